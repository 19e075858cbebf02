//! Progress events and the sinks that receive them.
//!
//! Every event is a self-contained JSON object tagged by `type`. Timestamps
//! are monotonic within one kind; no ordering is promised across kinds.

use super::header::TestRunHeader;
use super::rate;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Ping,
    Download,
    Upload,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Ping => "ping",
            TransferKind::Download => "download",
            TransferKind::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes per second since the phase started.
    pub bandwidth: u64,
    pub bytes: u64,
    /// Milliseconds since the phase started.
    pub elapsed: u64,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingProgress {
    pub jitter: f64,
    pub latency: f64,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    TestStart(TestRunHeader),
    Ping {
        timestamp: DateTime<Utc>,
        ping: PingProgress,
    },
    Download {
        timestamp: DateTime<Utc>,
        download: TransferProgress,
    },
    Upload {
        timestamp: DateTime<Utc>,
        upload: TransferProgress,
    },
}

impl ProgressEvent {
    pub fn ping(latency: f64, jitter: f64, progress: f64) -> Self {
        ProgressEvent::Ping {
            timestamp: Utc::now(),
            ping: PingProgress {
                jitter,
                latency,
                progress: progress.clamp(0.0, 1.0),
            },
        }
    }

    pub fn kind(&self) -> Option<TransferKind> {
        match self {
            ProgressEvent::TestStart(_) => None,
            ProgressEvent::Ping { .. } => Some(TransferKind::Ping),
            ProgressEvent::Download { .. } => Some(TransferKind::Download),
            ProgressEvent::Upload { .. } => Some(TransferKind::Upload),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProgressEvent::TestStart(header) => header.timestamp,
            ProgressEvent::Ping { timestamp, .. }
            | ProgressEvent::Download { timestamp, .. }
            | ProgressEvent::Upload { timestamp, .. } => *timestamp,
        }
    }
}

/// Accumulator state captured at one emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub kind: TransferKind,
    pub bytes: u64,
    pub elapsed: Duration,
    pub budget: Duration,
}

impl ProgressSnapshot {
    pub fn bandwidth(&self) -> f64 {
        rate::bytes_per_second(self.bytes, self.elapsed)
    }

    pub fn completion(&self) -> f64 {
        if self.budget.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.budget.as_secs_f64()).clamp(0.0, 1.0)
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            bandwidth: self.bandwidth() as u64,
            bytes: self.bytes,
            elapsed: self.elapsed.as_millis() as u64,
            progress: self.completion(),
        }
    }

    /// Returns `None` for ping snapshots, which carry no latency data.
    pub fn into_event(self, timestamp: DateTime<Utc>) -> Option<ProgressEvent> {
        match self.kind {
            TransferKind::Ping => None,
            TransferKind::Download => Some(ProgressEvent::Download {
                timestamp,
                download: self.progress(),
            }),
            TransferKind::Upload => Some(ProgressEvent::Upload {
                timestamp,
                upload: self.progress(),
            }),
        }
    }
}

/// Receives progress events. Called outside of any accumulator lock, but
/// possibly from many workers at once.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> EventSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events to an async consumer such as the terminal UI.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("progress receiver dropped, discarding event");
        }
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: ProgressEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("error generating progress update: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            tracing::error!("error writing progress update: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn snapshot(kind: TransferKind, bytes: u64, elapsed_ms: u64, budget_ms: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            kind,
            bytes,
            elapsed: Duration::from_millis(elapsed_ms),
            budget: Duration::from_millis(budget_ms),
        }
    }

    #[test]
    fn test_snapshot_fields() {
        let progress = snapshot(TransferKind::Download, 5_000, 500, 10_000).progress();
        assert_eq!(progress.bytes, 5_000);
        assert_eq!(progress.elapsed, 500);
        assert_eq!(progress.bandwidth, 10_000);
        assert!((progress.progress - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_completion_clamped_past_budget() {
        let s = snapshot(TransferKind::Upload, 1, 15_000, 10_000);
        assert_eq!(s.completion(), 1.0);
        assert_eq!(snapshot(TransferKind::Upload, 1, 0, 10_000).completion(), 0.0);
    }

    #[test]
    fn test_zero_elapsed_bandwidth() {
        let s = snapshot(TransferKind::Download, 0, 0, 10_000);
        assert_eq!(s.bandwidth(), 0.0);
        assert_eq!(s.progress().bandwidth, 0);
    }

    #[test]
    fn test_ping_snapshot_has_no_event() {
        let s = snapshot(TransferKind::Ping, 10, 10, 100);
        assert!(s.into_event(Utc::now()).is_none());
    }

    #[test]
    fn test_download_event_shape() {
        let event = snapshot(TransferKind::Download, 2_000, 1_000, 4_000)
            .into_event(Utc::now())
            .unwrap();
        let value: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "download");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["download"]["bytes"], 2_000);
        assert_eq!(value["download"]["elapsed"], 1_000);
        assert_eq!(value["download"]["bandwidth"], 2_000);
        assert_eq!(value["download"]["progress"], 0.25);
    }

    #[test]
    fn test_upload_event_shape() {
        let event = snapshot(TransferKind::Upload, 10, 10, 10)
            .into_event(Utc::now())
            .unwrap();
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "upload");
        assert!(value["upload"].is_object());
        assert!(value.get("download").is_none());
    }

    #[test]
    fn test_ping_event_shape() {
        let value: Value = serde_json::to_value(ProgressEvent::ping(12.5, 1.5, 0.5)).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["ping"]["latency"], 12.5);
        assert_eq!(value["ping"]["jitter"], 1.5);
        assert_eq!(value["ping"]["progress"], 0.5);
    }

    #[test]
    fn test_event_roundtrip_keeps_kind() {
        let event = ProgressEvent::ping(3.0, 0.0, 1.0);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), Some(TransferKind::Ping));
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(ProgressEvent::ping(1.0, 0.0, 0.1));
        sink.emit(ProgressEvent::ping(2.0, 1.0, 0.2));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["type"], "ping");
        }
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.emit(ProgressEvent::ping(1.0, 0.0, 1.0));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), Some(TransferKind::Ping));

        drop(rx);
        // Emitting after the receiver is gone is not an error
        sink.emit(ProgressEvent::ping(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_closure_sink() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = move |event: ProgressEvent| captured.lock().push(event);
        sink.emit(ProgressEvent::ping(1.0, 0.0, 1.0));
        assert_eq!(seen.lock().len(), 1);
    }
}
