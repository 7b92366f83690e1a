//! Scriptable swarm and packager doubles for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::packager::{PackagingError, PackagingJob, PackagingProcess, SegmentPackager};
use crate::swarm::{
    ContentDescriptor, StreamSource, SwarmCounters, SwarmEngine, SwarmError, SwarmFile,
    SwarmHandle, SwarmStats,
};

pub(crate) fn media_fixture() -> Vec<SwarmFile> {
    vec![
        SwarmFile {
            index: 0,
            name: "a.txt".to_string(),
            length: 100,
            path: "Movie/a.txt".to_string(),
        },
        SwarmFile {
            index: 1,
            name: "movie.mp4".to_string(),
            length: 5_000_000,
            path: "Movie/movie.mp4".to_string(),
        },
        SwarmFile {
            index: 2,
            name: "sample.mp4".to_string(),
            length: 1_000,
            path: "Movie/sample.mp4".to_string(),
        },
    ]
}

/// Counter values returned on successive polls. The last value repeats.
#[derive(Debug, Clone)]
pub(crate) struct CounterScript {
    values: VecDeque<SwarmCounters>,
}

impl CounterScript {
    pub(crate) fn sequence(values: Vec<SwarmCounters>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub(crate) fn constant(value: SwarmCounters) -> Self {
        Self::sequence(vec![value])
    }

    fn next(&mut self) -> SwarmCounters {
        if self.values.len() > 1 {
            self.values.pop_front().unwrap_or_default()
        } else {
            self.values.front().copied().unwrap_or_default()
        }
    }
}

pub(crate) struct MockSwarmHandle {
    files: Vec<SwarmFile>,
    script: Mutex<CounterScript>,
    selection: Mutex<Vec<bool>>,
    reannounces: AtomicU32,
    destroys: AtomicU32,
    counters_fail: AtomicBool,
}

impl MockSwarmHandle {
    pub(crate) fn new(files: Vec<SwarmFile>) -> Self {
        let selection = vec![true; files.len()];
        Self {
            files,
            script: Mutex::new(CounterScript::constant(SwarmCounters::default())),
            selection: Mutex::new(selection),
            reannounces: AtomicU32::new(0),
            destroys: AtomicU32::new(0),
            counters_fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_script(self, script: CounterScript) -> Self {
        *self.script.lock() = script;
        self
    }

    pub(crate) fn fail_counters(&self) {
        self.counters_fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reannounce_count(&self) -> u32 {
        self.reannounces.load(Ordering::SeqCst)
    }

    pub(crate) fn destroy_count(&self) -> u32 {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwarmStats for MockSwarmHandle {
    async fn counters(&self) -> Result<SwarmCounters, SwarmError> {
        if self.counters_fail.load(Ordering::SeqCst) {
            return Err(SwarmError::EngineFailed {
                reason: "mock failure".to_string(),
            });
        }
        Ok(self.script.lock().next())
    }

    async fn reannounce(&self) -> Result<(), SwarmError> {
        self.reannounces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SwarmHandle for MockSwarmHandle {
    fn files(&self) -> Vec<SwarmFile> {
        self.files.clone()
    }

    async fn select_exclusive(&self, index: usize) -> Result<(), SwarmError> {
        if index >= self.files.len() {
            return Err(SwarmError::FileIndexOutOfRange {
                index,
                file_count: self.files.len(),
            });
        }
        let mut selection = self.selection.lock();
        for (i, flag) in selection.iter_mut().enumerate() {
            *flag = i == index;
        }
        Ok(())
    }

    async fn selection(&self) -> Result<Vec<bool>, SwarmError> {
        Ok(self.selection.lock().clone())
    }

    async fn stream_source(&self, index: usize) -> Result<StreamSource, SwarmError> {
        Ok(StreamSource::Url(format!("mock://stream/{index}")))
    }

    async fn destroy(&self) -> Result<(), SwarmError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine returning one pre-built handle.
pub(crate) struct MockSwarmEngine {
    handle: Arc<MockSwarmHandle>,
    open_delay: Duration,
}

impl MockSwarmEngine {
    pub(crate) fn new(handle: Arc<MockSwarmHandle>) -> Self {
        Self {
            handle,
            open_delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

#[async_trait]
impl SwarmEngine for MockSwarmEngine {
    async fn open(
        &self,
        _descriptor: &ContentDescriptor,
    ) -> Result<Arc<dyn SwarmHandle>, SwarmError> {
        tokio::time::sleep(self.open_delay).await;
        Ok(Arc::clone(&self.handle) as Arc<dyn SwarmHandle>)
    }

    fn engine_type(&self) -> &'static str {
        "mock"
    }
}

/// Packager whose processes run until stopped or told to exit.
#[derive(Default)]
pub(crate) struct MockPackager {
    pub(crate) started: AtomicU32,
    pub(crate) stopped: Arc<AtomicU32>,
    pub(crate) fail_start: AtomicBool,
    pub(crate) exit_signal: Arc<Notify>,
    pub(crate) exit_with_failure: Arc<AtomicBool>,
}

#[async_trait]
impl SegmentPackager for MockPackager {
    async fn start(&self, job: PackagingJob) -> Result<Box<dyn PackagingProcess>, PackagingError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PackagingError::ExitedDuringStartup {
                status: "exit code 1".to_string(),
                stderr_tail: format!("{}: Invalid data found", job.source),
            });
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProcess {
            stopped: Arc::clone(&self.stopped),
            exit_signal: Arc::clone(&self.exit_signal),
            exit_with_failure: Arc::clone(&self.exit_with_failure),
        }))
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct MockProcess {
    stopped: Arc<AtomicU32>,
    exit_signal: Arc<Notify>,
    exit_with_failure: Arc<AtomicBool>,
}

#[async_trait]
impl PackagingProcess for MockProcess {
    async fn wait(&mut self) -> Result<(), PackagingError> {
        self.exit_signal.notified().await;
        if self.exit_with_failure.load(Ordering::SeqCst) {
            return Err(PackagingError::Crashed {
                status: "exit code 1".to_string(),
                stderr_tail: "mock crash".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PackagingError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
