use super::header::{ClientInfo, ServerInfo};
use super::progress::ProgressSnapshot;
use crate::error::Result;
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Totals for one finished download or upload phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub bytes: u64,
    /// Milliseconds.
    pub elapsed: u64,
    /// Bytes per second.
    pub bandwidth: u64,
}

impl From<ProgressSnapshot> for TransferSummary {
    fn from(snapshot: ProgressSnapshot) -> Self {
        Self {
            bytes: snapshot.bytes,
            elapsed: snapshot.elapsed.as_millis() as u64,
            bandwidth: snapshot.bandwidth() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportServer {
    pub id: u32,
    pub name: String,
    pub url: String,
    pub location: String,
    pub country: String,
}

impl ReportServer {
    pub fn new(settings: &Settings, server: &ServerInfo) -> Self {
        Self {
            id: server.id,
            name: server.name.clone(),
            url: settings.server_url.clone(),
            location: server.location.clone(),
            country: server.country.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub timestamp: DateTime<Utc>,
    pub server: ReportServer,
    pub client: ClientInfo,
    /// Mean latency in milliseconds.
    pub ping: f64,
    pub jitter: f64,
    pub upload: TransferSummary,
    pub download: TransferSummary,
    pub share: String,
}

impl JsonReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::progress::TransferKind;
    use serde_json::Value;
    use std::time::Duration;

    #[test]
    fn test_summary_from_snapshot() {
        let summary = TransferSummary::from(ProgressSnapshot {
            kind: TransferKind::Upload,
            bytes: 30_000_000,
            elapsed: Duration::from_secs(10),
            budget: Duration::from_secs(10),
        });
        assert_eq!(summary.bytes, 30_000_000);
        assert_eq!(summary.elapsed, 10_000);
        assert_eq!(summary.bandwidth, 3_000_000);
    }

    fn sample_report() -> JsonReport {
        JsonReport {
            timestamp: Utc::now(),
            server: ReportServer {
                id: 1,
                name: "Cloudflare".to_string(),
                url: "https://speed.cloudflare.com".to_string(),
                location: "AMS".to_string(),
                country: "NL".to_string(),
            },
            client: ClientInfo {
                ip: "203.0.113.7".to_string(),
                isp: "Example ISP".to_string(),
                ..ClientInfo::default()
            },
            ping: 12.0,
            jitter: 1.5,
            upload: TransferSummary::default(),
            download: TransferSummary {
                bytes: 100,
                elapsed: 1_000,
                bandwidth: 100,
            },
            share: String::new(),
        }
    }

    #[test]
    fn test_report_shape() {
        let report = sample_report();
        let value: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["server"]["url"], "https://speed.cloudflare.com");
        assert_eq!(value["client"]["ip"], "203.0.113.7");
        assert_eq!(value["client"]["isp"], "Example ISP");
        assert_eq!(value["download"]["bandwidth"], 100);
        assert_eq!(value["ping"], 12.0);
        assert_eq!(value["share"], "");
    }

    #[test]
    fn test_save_writes_pretty_json() {
        let path = std::env::temp_dir().join(format!("speedmeter-report-{}.json", std::process::id()));
        let report = sample_report();
        report.save(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(contents.contains('\n'));
        let value: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["download"]["bytes"], 100);
        assert_eq!(value["jitter"], 1.5);
    }
}
