//! Status projection for polling clients.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{SessionSnapshot, SessionState};

/// Caller-facing view of one session's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: SessionState,
    /// Downloaded bytes relative to the selected file, 0 to 100
    pub progress_percent: f64,
    pub peer_count: u32,
    pub bytes_downloaded: u64,
    pub download_rate: u64,
    pub upload_rate: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packaged_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Builds the report from the session's last sample.
    pub fn project(snapshot: &SessionSnapshot) -> Self {
        let counters = snapshot.metrics.counters;
        let total = snapshot.selected_file.as_ref().map_or(0, |f| f.length);

        Self {
            state: snapshot.state,
            progress_percent: progress_percent(counters.bytes_downloaded, total),
            peer_count: counters.peer_count,
            bytes_downloaded: counters.bytes_downloaded,
            download_rate: counters.download_rate,
            upload_rate: counters.upload_rate,
            file_name: snapshot.selected_file.as_ref().map(|f| f.name.clone()),
            packaged_seconds: snapshot
                .packager_progress
                .as_ref()
                .and_then(|p| p.packaged_seconds()),
            sampled_at: snapshot.metrics.sampled_at,
        }
    }
}

/// Percentage of `total` covered by `downloaded`, clamped to 100.
///
/// Swarm counters include protocol overhead and neighbouring pieces, so
/// `downloaded` may exceed the file length.
pub fn progress_percent(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((downloaded as f64 / total as f64) * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MetricsSnapshot, SessionId};
    use crate::swarm::{ContentDescriptor, MediaFileRef, SwarmCounters};

    fn snapshot(selected_length: Option<u64>, bytes: u64) -> SessionSnapshot {
        SessionSnapshot {
            id: SessionId::from("s1"),
            descriptor: ContentDescriptor::parse("magnet:?xt=urn:btih:abc").unwrap(),
            state: SessionState::Active,
            files: Vec::new(),
            selected_file: selected_length.map(|length| MediaFileRef {
                name: "movie.mp4".to_string(),
                length,
                path: "movie.mp4".to_string(),
                index: 1,
            }),
            metrics: MetricsSnapshot {
                counters: SwarmCounters {
                    bytes_downloaded: bytes,
                    peer_count: 7,
                    download_rate: 1_000,
                    upload_rate: 50,
                },
                sampled_at: None,
            },
            created_at: Utc::now(),
            ticket: None,
            packager_progress: None,
        }
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(500, 0), 0.0);
        assert_eq!(progress_percent(250, 1_000), 25.0);
        assert_eq!(progress_percent(5_000, 1_000), 100.0);
    }

    #[test]
    fn test_projection_copies_counters() {
        let report = StatusReport::project(&snapshot(Some(2_000), 500));

        assert_eq!(report.state, SessionState::Active);
        assert_eq!(report.progress_percent, 25.0);
        assert_eq!(report.peer_count, 7);
        assert_eq!(report.download_rate, 1_000);
        assert_eq!(report.upload_rate, 50);
        assert_eq!(report.file_name.as_deref(), Some("movie.mp4"));
    }

    #[test]
    fn test_projection_without_selection_reports_zero_progress() {
        let report = StatusReport::project(&snapshot(None, 500));
        assert_eq!(report.progress_percent, 0.0);
        assert_eq!(report.bytes_downloaded, 500);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(StatusReport::project(&snapshot(Some(1_000), 10))).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["peerCount"], 7);
        assert!(json.get("progressPercent").is_some());
        assert!(json.get("sampledAt").is_none());
    }
}
