pub mod counter;
pub mod download;
pub mod header;
pub mod payload;
pub mod ping;
pub mod progress;
pub mod rate;
pub mod report;
pub mod upload;

use crate::error::{Error, Result};
use crate::settings::Settings;
use chrono::Utc;
use counter::ByteCounter;
use download::DownloadTest;
use payload::CircularPayload;
use ping::PingTest;
use progress::{EventSink, ProgressEvent, TransferKind};
use report::{JsonReport, ReportServer};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use upload::UploadTest;

#[derive(Debug, Clone, Default)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
}

impl SpeedTestResult {
    pub fn from_report(report: &JsonReport, settings: &Settings) -> Self {
        let unit = settings.unit_base;
        Self {
            download_mbps: unit.to_megabits(report.download.bandwidth as f64),
            upload_mbps: unit.to_megabits(report.upload.bandwidth as f64),
            ping_ms: report.ping,
            jitter_ms: report.jitter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
    Complete,
}

/// Waits for every worker of a phase. A failed worker only ends its own
/// loop; the phase fails when none of them succeeded. Dropping the future
/// aborts the workers still running.
pub(crate) async fn join_workers(kind: TransferKind, mut workers: JoinSet<Result<()>>) -> Result<()> {
    let total = workers.len();
    let mut failed = 0;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("{} worker stopped: {}", kind, e);
                failed += 1;
            }
            Err(e) => {
                warn!("{} worker panicked: {}", kind, e);
                failed += 1;
            }
        }
    }

    if total > 0 && failed == total {
        return Err(Error::AllWorkersFailed { kind, workers: total });
    }
    Ok(())
}

fn phase_counter(kind: TransferKind, settings: &Settings, sink: &Arc<dyn EventSink>) -> ByteCounter {
    let budget = match kind {
        TransferKind::Upload => settings.upload_duration(),
        _ => settings.download_duration(),
    };
    ByteCounter::new(kind)
        .with_unit_base(settings.unit_base)
        .with_budget(budget)
        .with_emit_interval(settings.progress_interval())
        .with_sink(sink.clone())
}

/// Runs header, ping, download and upload in order, publishing progress to
/// `sink`, and returns the final report.
pub async fn run_speed_test(settings: Settings, sink: Arc<dyn EventSink>) -> Result<JsonReport> {
    settings.validate()?;

    let client = header::fetch_client_info(&settings).await;
    let test_header = header::build_header(&settings, &client);
    let server = ReportServer::new(&settings, &test_header.server);
    sink.emit(ProgressEvent::TestStart(test_header));

    let mut ping_test = PingTest::new(settings.ping_url(), settings.ping_count)?;
    let ping = ping_test.run(sink.clone()).await?;
    info!(latency_ms = ping.latency_ms, jitter_ms = ping.jitter_ms, "ping complete");

    let download_counter = Arc::new(phase_counter(TransferKind::Download, &settings, &sink));
    let download = DownloadTest::new(settings.download_url(), settings.connections, settings.download_duration())?
        .run(download_counter.clone())
        .await?;
    info!(rate = %download_counter.humanize(), bytes = download.bytes, "download complete");

    // Generated before any upload worker starts; entropy failure aborts here
    let payload = CircularPayload::random(settings.upload_size_kib)?;
    let upload_counter = Arc::new(phase_counter(TransferKind::Upload, &settings, &sink).with_payload(payload));
    let upload = UploadTest::new(
        settings.upload_url(),
        settings.connections,
        settings.upload_request_bytes,
        settings.upload_duration(),
    )?
    .run(upload_counter.clone())
    .await?;
    info!(rate = %upload_counter.humanize(), bytes = upload.bytes, "upload complete");

    Ok(JsonReport {
        timestamp: Utc::now(),
        server,
        client,
        ping: ping.latency_ms,
        jitter: ping.jitter_ms,
        upload,
        download,
        share: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phase_survives_partial_failure() {
        let mut workers = JoinSet::new();
        workers.spawn(async { Ok(()) });
        workers.spawn(async { Err(Error::Config("dropped".to_string())) });
        assert!(join_workers(TransferKind::Download, workers).await.is_ok());
    }

    #[tokio::test]
    async fn test_phase_fails_when_all_workers_fail() {
        let mut workers = JoinSet::new();
        for _ in 0..3 {
            workers.spawn(async { Err(Error::Config("dropped".to_string())) });
        }
        let err = join_workers(TransferKind::Upload, workers).await.unwrap_err();
        assert!(matches!(err, Error::AllWorkersFailed { workers: 3, .. }));
        assert_eq!(err.to_string(), "all 3 upload workers failed");
    }

    #[test]
    fn test_phase_counter_budget() {
        let settings = Settings {
            upload_duration_ms: 3_000,
            ..Settings::default()
        };
        let sink: Arc<dyn EventSink> = Arc::new(progress::NullSink);
        let counter = phase_counter(TransferKind::Upload, &settings, &sink);
        assert_eq!(counter.snapshot().budget.as_millis(), 3_000);
    }

    #[test]
    fn test_result_from_report() {
        let report = JsonReport {
            timestamp: Utc::now(),
            server: ReportServer::default(),
            client: header::ClientInfo::default(),
            ping: 10.0,
            jitter: 2.0,
            upload: report::TransferSummary {
                bytes: 0,
                elapsed: 0,
                bandwidth: 1_250_000,
            },
            download: report::TransferSummary {
                bytes: 0,
                elapsed: 0,
                bandwidth: 12_500_000,
            },
            share: String::new(),
        };
        let result = SpeedTestResult::from_report(&report, &Settings::default());
        assert_eq!(result.download_mbps, 100.0);
        assert_eq!(result.upload_mbps, 10.0);
        assert_eq!(result.ping_ms, 10.0);
    }
}
