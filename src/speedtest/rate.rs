use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Multiple used when scaling byte rates for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitBase {
    /// Multiples of 1000 (KB, MB, GB).
    #[default]
    Decimal,
    /// Multiples of 1024 (KiB, MiB, GiB).
    Binary,
}

impl UnitBase {
    pub fn multiple(self) -> f64 {
        match self {
            UnitBase::Decimal => 1000.0,
            UnitBase::Binary => 1024.0,
        }
    }

    /// Bytes per second in one megabit (or mebibit) per second.
    pub fn megabit_divisor(self) -> f64 {
        match self {
            UnitBase::Decimal => 125_000.0,
            UnitBase::Binary => 131_072.0,
        }
    }

    pub fn rate_label(self) -> &'static str {
        match self {
            UnitBase::Decimal => "Mbps",
            UnitBase::Binary => "Mibps",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            UnitBase::Decimal => UnitBase::Binary,
            UnitBase::Binary => UnitBase::Decimal,
        }
    }

    fn suffixes(self) -> [&'static str; 3] {
        match self {
            UnitBase::Decimal => ["KB/s", "MB/s", "GB/s"],
            UnitBase::Binary => ["KiB/s", "MiB/s", "GiB/s"],
        }
    }

    /// Converts a byte rate into megabits (or mebibits) per second.
    pub fn to_megabits(self, bytes_per_sec: f64) -> f64 {
        bytes_per_sec / self.megabit_divisor()
    }

    /// Formats a byte rate with two decimals, scaling up to gigabytes.
    pub fn humanize(self, bytes_per_sec: f64) -> String {
        let base = self.multiple();
        if bytes_per_sec < base {
            return format!("{:.2} bytes/s", bytes_per_sec);
        }

        let mut value = bytes_per_sec;
        let mut suffix = "";
        for unit in self.suffixes() {
            value /= base;
            suffix = unit;
            if value < base {
                break;
            }
        }
        format!("{:.2} {}", value, suffix)
    }
}

/// Average rate over `elapsed`, or 0 when no time has passed.
pub fn bytes_per_second(total_bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        total_bytes as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_decimal_units() {
        let unit = UnitBase::Decimal;
        assert_eq!(unit.humanize(500.0), "500.00 bytes/s");
        assert_eq!(unit.humanize(5_000.0), "5.00 KB/s");
        assert_eq!(unit.humanize(5_000_000.0), "5.00 MB/s");
        assert_eq!(unit.humanize(5_000_000_000.0), "5.00 GB/s");
    }

    #[test]
    fn test_humanize_binary_units() {
        let unit = UnitBase::Binary;
        assert_eq!(unit.humanize(1000.0), "1000.00 bytes/s");
        assert_eq!(unit.humanize(5.0 * 1024.0), "5.00 KiB/s");
        assert_eq!(unit.humanize(5.0 * 1024.0 * 1024.0), "5.00 MiB/s");
        assert_eq!(unit.humanize(5.0 * 1024.0 * 1024.0 * 1024.0), "5.00 GiB/s");
    }

    #[test]
    fn test_humanize_stays_in_gigabytes() {
        assert_eq!(UnitBase::Decimal.humanize(5_000_000_000_000.0), "5000.00 GB/s");
    }

    #[test]
    fn test_humanize_boundary() {
        assert_eq!(UnitBase::Decimal.humanize(999.0), "999.00 bytes/s");
        assert_eq!(UnitBase::Decimal.humanize(1000.0), "1.00 KB/s");
        assert_eq!(UnitBase::Decimal.humanize(0.0), "0.00 bytes/s");
    }

    #[test]
    fn test_megabits() {
        assert_eq!(UnitBase::Decimal.to_megabits(1_250_000.0), 10.0);
        assert_eq!(UnitBase::Binary.to_megabits(131_072.0), 1.0);
    }

    #[test]
    fn test_zero_elapsed_rate_is_zero() {
        let rate = bytes_per_second(0, Duration::ZERO);
        assert_eq!(rate, 0.0);
        assert!(!rate.is_nan());
        assert_eq!(bytes_per_second(4096, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_rate() {
        assert_eq!(bytes_per_second(10_000, Duration::from_secs(2)), 5_000.0);
    }

    #[test]
    fn test_unit_base_serde() {
        let unit: UnitBase = serde_json::from_str("\"binary\"").unwrap();
        assert_eq!(unit, UnitBase::Binary);
        assert_eq!(serde_json::to_string(&UnitBase::Decimal).unwrap(), "\"decimal\"");
    }
}
