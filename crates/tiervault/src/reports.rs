//! # Admin Reports
//!
//! Read-only views composed from store readers and the plugin config.

use std::fmt;
use std::path::{Path, PathBuf};

use tiervault_store::{AuditLogEntry, Store, StoreStatistics, Tier, UserEntry, AUDIT_CAPACITY};

use crate::plugin_config::ConfigManager;

/// Gold stock below this raises an alert.
pub const GOLD_ALERT_FLOOR: u64 = 5;

/// Purple stock below this raises an alert.
pub const PURPLE_ALERT_FLOOR: u64 = 10;

/// Users per export batch.
pub const EXPORT_BATCH_SIZE: usize = 50;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A pool running low.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockAlert {
    /// Registration codes under the configured threshold.
    Registration(usize),
    /// A lottery tier under its fixed floor.
    Tier(Tier, u64),
}

impl fmt::Display for StockAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration(n) => write!(f, "registration codes low: {n} left"),
            Self::Tier(tier, n) => write!(f, "{tier} cards low: {n} left"),
        }
    }
}

/// Pools under their alert level.
#[must_use]
pub fn stock_alerts(stats: &StoreStatistics, registration_threshold: usize) -> Vec<StockAlert> {
    let mut alerts = Vec::new();
    if stats.registration_unused < registration_threshold {
        alerts.push(StockAlert::Registration(stats.registration_unused));
    }
    for (tier, floor) in [(Tier::Gold, GOLD_ALERT_FLOOR), (Tier::Purple, PURPLE_ALERT_FLOOR)] {
        let left = stats.tier_stock.get(tier);
        if left < floor {
            alerts.push(StockAlert::Tier(tier, left));
        }
    }
    alerts
}

/// Presence and size of one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    /// File checked.
    pub path: PathBuf,
    /// Size in bytes; `None` if missing.
    pub size: Option<u64>,
}

impl FileStatus {
    fn probe(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            size: std::fs::metadata(path).ok().map(|m| m.len()),
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        match self.size {
            Some(size) => write!(f, "{name}: {size} bytes"),
            None => write!(f, "{name}: missing"),
        }
    }
}

/// System health summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// Primary data file.
    pub data_file: FileStatus,
    /// Backup data file.
    pub backup_file: FileStatus,
    /// Retained audit entries.
    pub log_count: usize,
    /// Newest audit entry.
    pub latest_log: Option<AuditLogEntry>,
    /// Plugin master switch.
    pub enabled: bool,
    /// Plugin test mode.
    pub test_mode: bool,
    /// Exchange window label.
    pub exchange_window: String,
}

impl HealthReport {
    /// Gathers the report.
    #[must_use]
    pub fn collect(store: &Store, config: &ConfigManager) -> Self {
        let logs = store.logs(AUDIT_CAPACITY);
        Self {
            data_file: FileStatus::probe(store.data_path()),
            backup_file: FileStatus::probe(store.backup_path()),
            log_count: logs.len(),
            latest_log: logs.into_iter().next(),
            enabled: config.is_enabled(),
            test_mode: config.is_test_mode(),
            exchange_window: config.exchange_window_label(),
        }
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data files:")?;
        writeln!(f, "  {}", self.data_file)?;
        writeln!(f, "  {}", self.backup_file)?;
        writeln!(f, "Audit log: {} entries", self.log_count)?;
        if let Some(entry) = &self.latest_log {
            writeln!(
                f,
                "  latest: {} ({})",
                entry.action,
                entry.timestamp.format("%Y-%m-%d %H:%M")
            )?;
        }
        writeln!(f, "Config:")?;
        writeln!(f, "  enabled: {}", if self.enabled { "on" } else { "off" })?;
        writeln!(f, "  test mode: {}", if self.test_mode { "ON" } else { "off" })?;
        write!(f, "  exchange window: {}", self.exchange_window)
    }
}

/// One export line: `user_id,code,reg_time,imported`.
#[must_use]
pub fn export_line(entry: &UserEntry) -> String {
    format!(
        "{},{},{},{}",
        entry.user_id,
        entry.record.reg_code.as_deref().unwrap_or_default(),
        entry.reg_time().format(TIMESTAMP_FORMAT),
        entry.record.imported
    )
}

/// Every registered user as export lines, split into batches.
#[must_use]
pub fn export_users(store: &Store, batch_size: usize) -> Vec<Vec<String>> {
    let lines: Vec<String> = store.all_registered_users().iter().map(export_line).collect();
    lines
        .chunks(batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tiervault_store::{RegisteredUser, TierCounts};

    fn stats(registration_unused: usize, gold: u64, purple: u64) -> StoreStatistics {
        StoreStatistics {
            registered_users: 0,
            registration_unused,
            registration_used: 0,
            tier_stock: TierCounts::from_parts(gold, purple, 100, 0),
            tier_draws: TierCounts::new(),
            blacklist_count: 0,
            total_draws: 0,
        }
    }

    #[test]
    fn test_stock_alerts() {
        assert!(stock_alerts(&stats(10, 5, 10), 10).is_empty());

        let alerts = stock_alerts(&stats(9, 4, 9), 10);
        assert_eq!(
            alerts,
            [
                StockAlert::Registration(9),
                StockAlert::Tier(Tier::Gold, 4),
                StockAlert::Tier(Tier::Purple, 9),
            ]
        );
        assert_eq!(alerts[1].to_string(), "gold cards low: 4 left");
    }

    #[test]
    fn test_export_line() {
        let reg_time = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let issued = UserEntry {
            user_id: "10001".into(),
            record: RegisteredUser {
                reg_code: Some("ABC".into()),
                reg_time,
                imported: false,
            },
        };
        assert_eq!(export_line(&issued), "10001,ABC,2024-01-02T03:04:05,false");

        let imported = UserEntry {
            user_id: "10002".into(),
            record: RegisteredUser {
                reg_code: None,
                reg_time,
                imported: true,
            },
        };
        assert_eq!(export_line(&imported), "10002,,2024-01-02T03:04:05,true");
    }

    #[test]
    fn test_file_status_display() {
        let missing = FileStatus {
            path: PathBuf::from("/nowhere/data.json"),
            size: None,
        };
        assert_eq!(missing.to_string(), "data.json: missing");
        let present = FileStatus {
            size: Some(128),
            ..missing
        };
        assert_eq!(present.to_string(), "data.json: 128 bytes");
    }
}
