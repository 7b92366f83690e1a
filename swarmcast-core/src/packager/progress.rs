//! FFmpeg stderr progress parsing.

use std::time::Duration;

use serde::Serialize;

/// Progress reported by a running packager.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackagerProgress {
    /// Frames written so far
    pub frame: Option<u64>,
    /// Media time packaged so far
    pub time_position: Option<Duration>,
    /// Output bitrate in bits per second
    pub bitrate: Option<u64>,
    /// Processing speed relative to realtime
    pub speed: Option<f32>,
    /// Number of progress lines seen
    pub updates: u64,
}

impl PackagerProgress {
    /// Update progress from one FFmpeg status line.
    ///
    /// Lines look like
    /// `frame=  123 fps= 45 q=-1.0 size=N/A time=00:00:05.12 bitrate=N/A speed=1.2x`.
    /// Returns true when the line carried progress information.
    pub fn update_from_ffmpeg_line(&mut self, line: &str) -> bool {
        let mut matched = false;

        if let Some(frame) = extract_value(line, "frame=").and_then(|v| v.parse().ok()) {
            self.frame = Some(frame);
            matched = true;
        }

        if let Some(time) = extract_value(line, "time=").and_then(parse_ffmpeg_time) {
            self.time_position = Some(time);
            matched = true;
        }

        if let Some(kbps) = extract_value(line, "bitrate=")
            .and_then(|v| v.strip_suffix("kbits/s"))
            .and_then(|v| v.trim().parse::<f64>().ok())
        {
            self.bitrate = Some((kbps * 1000.0) as u64);
        }

        if let Some(speed) = extract_value(line, "speed=")
            .and_then(|v| v.strip_suffix('x'))
            .and_then(|v| v.trim().parse::<f32>().ok())
        {
            self.speed = Some(speed);
        }

        if matched {
            self.updates += 1;
        }
        matched
    }

    /// Packaged media time in seconds.
    pub fn packaged_seconds(&self) -> Option<f64> {
        self.time_position.map(|t| t.as_secs_f64())
    }
}

/// Extract the value following `key`, skipping FFmpeg's alignment padding
fn extract_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest.find(' ').unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then_some(value)
}

/// Parse FFmpeg time format (HH:MM:SS.mmm)
fn parse_ffmpeg_time(time_str: &str) -> Option<Duration> {
    let mut parts = time_str.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || seconds < 0.0 {
        return None;
    }

    let whole = hours * 3600 + minutes * 60 + seconds as u64;
    let millis = ((seconds.fract() * 1000.0) as u64).min(999);
    Some(Duration::from_secs(whole) + Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_progress_line() {
        let mut progress = PackagerProgress::default();
        let line = "frame=  123 fps= 45 q=-1.0 size=N/A time=00:01:05.50 bitrate=1234.5kbits/s speed=1.2x";

        assert!(progress.update_from_ffmpeg_line(line));
        assert_eq!(progress.frame, Some(123));
        assert_eq!(progress.time_position, Some(Duration::from_millis(65_500)));
        assert_eq!(progress.bitrate, Some(1_234_500));
        assert_eq!(progress.speed, Some(1.2));
        assert_eq!(progress.updates, 1);
        assert_eq!(progress.packaged_seconds(), Some(65.5));
    }

    #[test]
    fn test_ignores_unrelated_lines() {
        let mut progress = PackagerProgress::default();

        assert!(!progress.update_from_ffmpeg_line("Input #0, matroska,webm, from 'x':"));
        assert!(!progress.update_from_ffmpeg_line("[hls @ 0x1] Opening 'segment_00001.ts'"));
        assert_eq!(progress, PackagerProgress::default());
    }

    #[test]
    fn test_not_available_values_are_skipped() {
        let mut progress = PackagerProgress::default();
        assert!(progress.update_from_ffmpeg_line("size=N/A time=00:00:02.00 bitrate=N/A speed=N/A"));
        assert_eq!(progress.bitrate, None);
        assert_eq!(progress.speed, None);
        assert_eq!(progress.time_position, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_time_parsing() {
        assert_eq!(
            parse_ffmpeg_time("01:00:00.00"),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(parse_ffmpeg_time("00:00"), None);
        assert_eq!(parse_ffmpeg_time("-00:00:01.00"), None);
        assert_eq!(parse_ffmpeg_time("N/A"), None);
    }
}
