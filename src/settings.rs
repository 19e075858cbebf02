use crate::error::{Error, Result};
use crate::speedtest::rate::UnitBase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional TOML settings file.
pub const CONFIG_ENV: &str = "SPEEDMETER_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Tui,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub server_name: String,
    pub server_id: u32,
    pub ping_count: usize,
    /// Concurrent transfer workers per phase.
    pub connections: usize,
    pub download_duration_ms: u64,
    pub upload_duration_ms: u64,
    /// Bytes requested by each download GET.
    pub download_request_bytes: u64,
    /// Bytes sent in each upload POST body.
    pub upload_request_bytes: u64,
    /// Size of the replayed upload payload.
    pub upload_size_kib: usize,
    pub unit_base: UnitBase,
    pub progress_interval_ms: u64,
    pub output: OutputMode,
    pub log_file: Option<PathBuf>,
    /// Pretty-printed copy of the final report.
    pub report_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "https://speed.cloudflare.com".to_string(),
            server_name: "Cloudflare".to_string(),
            server_id: 0,
            ping_count: 20,
            connections: 4,
            download_duration_ms: 10_000,
            upload_duration_ms: 10_000,
            download_request_bytes: 25_000_000,
            upload_request_bytes: 10_000_000,
            upload_size_kib: 1024,
            unit_base: UnitBase::Decimal,
            progress_interval_ms: 100,
            output: OutputMode::Tui,
            log_file: None,
            report_file: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads the file named by `SPEEDMETER_CONFIG`, or falls back to defaults.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.ping_count == 0, "ping_count"),
            (self.connections == 0, "connections"),
            (self.download_duration_ms == 0, "download_duration_ms"),
            (self.upload_duration_ms == 0, "upload_duration_ms"),
            (self.download_request_bytes == 0, "download_request_bytes"),
            (self.upload_request_bytes == 0, "upload_request_bytes"),
            (self.upload_size_kib == 0, "upload_size_kib"),
            (self.progress_interval_ms == 0, "progress_interval_ms"),
        ];
        if let Some((_, field)) = checks.iter().find(|(invalid, _)| *invalid) {
            return Err(Error::Config(format!("{} must be greater than zero", field)));
        }
        reqwest::Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid server_url: {}", e)))?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), path)
    }

    pub fn ping_url(&self) -> String {
        self.endpoint("__down?bytes=0")
    }

    pub fn download_url(&self) -> String {
        self.endpoint(&format!("__down?bytes={}", self.download_request_bytes))
    }

    pub fn upload_url(&self) -> String {
        self.endpoint("__up")
    }

    pub fn meta_url(&self) -> String {
        self.endpoint("meta")
    }

    pub fn download_duration(&self) -> Duration {
        Duration::from_millis(self.download_duration_ms)
    }

    pub fn upload_duration(&self) -> Duration {
        Duration::from_millis(self.upload_duration_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Settings editable from the terminal UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    PingCount,
    Connections,
    DownloadDuration,
    UploadDuration,
    UploadSize,
    UnitBase,
}

impl SettingsField {
    pub const ALL: [SettingsField; 6] = [
        SettingsField::PingCount,
        SettingsField::Connections,
        SettingsField::DownloadDuration,
        SettingsField::UploadDuration,
        SettingsField::UploadSize,
        SettingsField::UnitBase,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            SettingsField::PingCount => "Ping samples",
            SettingsField::Connections => "Connections",
            SettingsField::DownloadDuration => "Download time",
            SettingsField::UploadDuration => "Upload time",
            SettingsField::UploadSize => "Upload payload",
            SettingsField::UnitBase => "Units",
        }
    }

    pub fn value(self, settings: &Settings) -> String {
        match self {
            SettingsField::PingCount => settings.ping_count.to_string(),
            SettingsField::Connections => settings.connections.to_string(),
            SettingsField::DownloadDuration => format!("{} s", settings.download_duration_ms / 1000),
            SettingsField::UploadDuration => format!("{} s", settings.upload_duration_ms / 1000),
            SettingsField::UploadSize => format!("{} KiB", settings.upload_size_kib),
            SettingsField::UnitBase => match settings.unit_base {
                UnitBase::Decimal => "decimal (1000)".to_string(),
                UnitBase::Binary => "binary (1024)".to_string(),
            },
        }
    }

    pub fn increase(self, settings: &mut Settings) {
        match self {
            SettingsField::PingCount => settings.ping_count = (settings.ping_count + 5).min(100),
            SettingsField::Connections => settings.connections = (settings.connections + 1).min(32),
            SettingsField::DownloadDuration => {
                settings.download_duration_ms = (settings.download_duration_ms + 5_000).min(60_000)
            }
            SettingsField::UploadDuration => {
                settings.upload_duration_ms = (settings.upload_duration_ms + 5_000).min(60_000)
            }
            SettingsField::UploadSize => settings.upload_size_kib = settings.upload_size_kib.saturating_mul(2).min(65_536),
            SettingsField::UnitBase => settings.unit_base = settings.unit_base.toggle(),
        }
    }

    pub fn decrease(self, settings: &mut Settings) {
        match self {
            SettingsField::PingCount => settings.ping_count = settings.ping_count.saturating_sub(5).max(5),
            SettingsField::Connections => settings.connections = settings.connections.saturating_sub(1).max(1),
            SettingsField::DownloadDuration => {
                settings.download_duration_ms = settings.download_duration_ms.saturating_sub(5_000).max(5_000)
            }
            SettingsField::UploadDuration => {
                settings.upload_duration_ms = settings.upload_duration_ms.saturating_sub(5_000).max(5_000)
            }
            SettingsField::UploadSize => settings.upload_size_kib = (settings.upload_size_kib / 2).max(64),
            SettingsField::UnitBase => settings.unit_base = settings.unit_base.toggle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.progress_interval(), Duration::from_millis(100));
        assert_eq!(settings.unit_base, UnitBase::Decimal);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
connections = 8
unit_base = "binary"
upload_size_kib = 256
output = "json"
"#,
        )
        .unwrap();
        assert_eq!(settings.connections, 8);
        assert_eq!(settings.unit_base, UnitBase::Binary);
        assert_eq!(settings.upload_size_kib, 256);
        assert_eq!(settings.output, OutputMode::Json);
        assert_eq!(settings.ping_count, 20);
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = Settings::from_toml("connections = 0").unwrap_err();
        assert!(err.to_string().contains("connections"));
        assert!(Settings::from_toml("upload_size_kib = 0").is_err());
        assert!(Settings::from_toml("progress_interval_ms = 0").is_err());
    }

    #[test]
    fn test_bad_url_rejected() {
        assert!(Settings::from_toml(r#"server_url = "not a url""#).is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        assert!(matches!(Settings::from_toml("connections = ["), Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoints() {
        let settings = Settings {
            server_url: "http://localhost:8080/".to_string(),
            download_request_bytes: 1000,
            ..Settings::default()
        };
        assert_eq!(settings.download_url(), "http://localhost:8080/__down?bytes=1000");
        assert_eq!(settings.upload_url(), "http://localhost:8080/__up");
        assert_eq!(settings.ping_url(), "http://localhost:8080/__down?bytes=0");
        assert_eq!(settings.meta_url(), "http://localhost:8080/meta");
    }

    #[test]
    fn test_field_cycle() {
        let mut field = SettingsField::PingCount;
        for _ in 0..SettingsField::ALL.len() {
            field = field.next();
        }
        assert_eq!(field, SettingsField::PingCount);
        assert_eq!(SettingsField::PingCount.prev(), SettingsField::UnitBase);
    }

    #[test]
    fn test_field_adjust_bounds() {
        let mut settings = Settings::default();
        for _ in 0..100 {
            SettingsField::Connections.decrease(&mut settings);
            SettingsField::UploadSize.decrease(&mut settings);
        }
        assert_eq!(settings.connections, 1);
        assert_eq!(settings.upload_size_kib, 64);
        assert!(settings.validate().is_ok());

        SettingsField::UnitBase.increase(&mut settings);
        assert_eq!(settings.unit_base, UnitBase::Binary);
    }
}
