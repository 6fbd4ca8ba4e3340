//! # Plugin Configuration
//!
//! Host settings in `config.toml`, next to the data file. Loaded once at
//! startup with the same `.bak` recovery as the data file; every
//! [`ConfigManager::update`] rewrites it atomically.
//!
//! Missing keys take their defaults, so an old file keeps loading after new
//! settings are added.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tiervault_store::{AtomicFile, LoadSource, StoreError, StoreResult};

use crate::error::{HostError, HostResult};

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Weekly window in which codes are handed out.
///
/// `weekday` counts from Monday = 0. The window runs from `hour:00` to
/// midnight of that day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeTime {
    /// Day of week, 0..=6.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday: Option<i64>,
    /// Opening hour, 0..=23.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<i64>,
}

/// State of the configured exchange window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeWindow {
    /// Weekday or hour missing.
    Unset,
    /// Weekday or hour out of range.
    Invalid,
    /// A usable window.
    Weekly {
        /// Monday = 0.
        weekday: u32,
        /// Opening hour.
        hour: u32,
    },
}

impl ExchangeTime {
    /// Validates the raw fields.
    #[must_use]
    pub fn window(&self) -> ExchangeWindow {
        let (Some(weekday), Some(hour)) = (self.weekday, self.hour) else {
            return ExchangeWindow::Unset;
        };
        match (u32::try_from(weekday), u32::try_from(hour)) {
            (Ok(weekday), Ok(hour)) if weekday <= 6 && hour <= 23 => {
                ExchangeWindow::Weekly { weekday, hour }
            }
            _ => ExchangeWindow::Invalid,
        }
    }
}

impl fmt::Display for ExchangeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Unset => f.write_str("not set"),
            Self::Invalid => f.write_str("invalid, please set again"),
            Self::Weekly { weekday, hour } => {
                let day = WEEKDAY_NAMES[weekday as usize];
                write!(f, "every {day} {hour}:00 - 24:00")
            }
        }
    }
}

/// Host settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// The only user allowed to run admin commands. Empty disables admin.
    pub admin_id: String,
    /// Groups the bot serves.
    pub target_groups: Vec<String>,
    /// Phrase that opens a user session.
    pub trigger_keyword: String,
    /// Weekly exchange window.
    pub exchange_time: ExchangeTime,
    /// Master switch.
    pub enabled: bool,
    /// Draws and registrations issue placeholders instead of real codes.
    pub test_mode: bool,
    /// Registration stock below this raises an alert.
    pub stock_alert_threshold: usize,
    /// Accept users without checking group membership.
    pub skip_group_check: bool,
    /// Idle seconds before a user session ends.
    pub session_timeout_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            admin_id: String::new(),
            target_groups: Vec::new(),
            trigger_keyword: "hello tiervault".to_string(),
            exchange_time: ExchangeTime::default(),
            enabled: true,
            test_mode: false,
            stock_alert_threshold: 10,
            skip_group_check: false,
            session_timeout_secs: 300,
        }
    }
}

fn decode_config(path: &Path, bytes: &[u8]) -> StoreResult<PluginConfig> {
    let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(text).map_err(|e| StoreError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Shared, persisted plugin configuration.
#[derive(Debug)]
pub struct ConfigManager {
    config: RwLock<PluginConfig>,
    file: AtomicFile,
    load_source: LoadSource,
}

impl ConfigManager {
    /// Loads `config.toml` from `dir`, creating the directory if needed.
    ///
    /// An unreadable file falls back to its backup, then to defaults.
    ///
    /// # Errors
    ///
    /// Fails only if `dir` cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> HostResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| HostError::Io {
            op: "create config dir",
            path: dir.clone(),
            source,
        })?;

        let file = AtomicFile::new(dir.join(CONFIG_FILE_NAME));
        file.sweep_stale_temps();
        let recovered = file.load_with(decode_config);
        tracing::info!(path = %file.path().display(), source = ?recovered.source, "Plugin config loaded");

        Ok(Self {
            config: RwLock::new(recovered.value.unwrap_or_default()),
            file,
            load_source: recovered.source,
        })
    }

    /// Which file the config came from.
    #[must_use]
    pub fn load_source(&self) -> LoadSource {
        self.load_source
    }

    /// Config file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> PluginConfig {
        self.config.read().clone()
    }

    /// Applies `f` and saves the result.
    ///
    /// # Errors
    ///
    /// Encode or write failure. The change stays applied in memory.
    pub fn update<T>(&self, f: impl FnOnce(&mut PluginConfig) -> T) -> HostResult<T> {
        let mut config = self.config.write();
        let value = f(&mut config);
        let text = toml::to_string_pretty(&*config)?;
        self.file.write(text.as_bytes())?;
        Ok(value)
    }

    /// Returns true if `user_id` is the configured admin.
    #[must_use]
    pub fn is_admin(&self, user_id: &str) -> bool {
        let config = self.config.read();
        !config.admin_id.is_empty() && config.admin_id == user_id
    }

    /// Master switch.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Test mode flag.
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        self.config.read().test_mode
    }

    /// Session trigger phrase.
    #[must_use]
    pub fn trigger_keyword(&self) -> String {
        self.config.read().trigger_keyword.clone()
    }

    /// Served groups.
    #[must_use]
    pub fn target_groups(&self) -> Vec<String> {
        self.config.read().target_groups.clone()
    }

    /// Registration stock alert threshold.
    #[must_use]
    pub fn stock_alert_threshold(&self) -> usize {
        self.config.read().stock_alert_threshold
    }

    /// Returns true if `now` falls inside the weekly exchange window.
    ///
    /// An unset or invalid window is always closed.
    #[must_use]
    pub fn is_in_exchange_time(&self, now: NaiveDateTime) -> bool {
        match self.config.read().exchange_time.window() {
            ExchangeWindow::Weekly { weekday, hour } => {
                now.weekday().num_days_from_monday() == weekday && now.hour() >= hour
            }
            ExchangeWindow::Unset | ExchangeWindow::Invalid => false,
        }
    }

    /// Human-readable exchange window.
    #[must_use]
    pub fn exchange_window_label(&self) -> String {
        self.config.read().exchange_time.window().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("tiervault_config_{tag}_{nanos}"))
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        // 2024-03-04 is a Monday.
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_defaults_when_missing() {
        let dir = test_dir("defaults");
        let manager = ConfigManager::open(&dir).unwrap();
        assert_eq!(manager.load_source(), LoadSource::Fresh);
        assert_eq!(manager.snapshot(), PluginConfig::default());
        assert!(manager.is_enabled());
        assert!(!manager.is_admin(""));
        assert_eq!(manager.exchange_window_label(), "not set");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = test_dir("partial");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(CONFIG_FILE_NAME),
            "admin_id = \"42\"\n[exchange_time]\nweekday = 4\nhour = 20\n",
        )
        .unwrap();

        let manager = ConfigManager::open(&dir).unwrap();
        assert!(manager.is_admin("42"));
        assert!(!manager.is_admin("43"));
        assert_eq!(manager.stock_alert_threshold(), 10);
        assert_eq!(manager.exchange_window_label(), "every Friday 20:00 - 24:00");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_exchange_window() {
        let dir = test_dir("window");
        let manager = ConfigManager::open(&dir).unwrap();
        assert!(!manager.is_in_exchange_time(at(8, 21)));

        manager
            .update(|c| {
                c.exchange_time = ExchangeTime {
                    weekday: Some(4),
                    hour: Some(20),
                };
            })
            .unwrap();
        // Friday 2024-03-08
        assert!(manager.is_in_exchange_time(at(8, 21)));
        assert!(manager.is_in_exchange_time(at(8, 20)));
        assert!(!manager.is_in_exchange_time(at(8, 19)));
        assert!(!manager.is_in_exchange_time(at(9, 21)));

        manager.update(|c| c.exchange_time.hour = Some(24)).unwrap();
        assert!(!manager.is_in_exchange_time(at(8, 21)));
        assert_eq!(manager.exchange_window_label(), "invalid, please set again");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_update_persists_and_recovers() {
        let dir = test_dir("persist");
        {
            let manager = ConfigManager::open(&dir).unwrap();
            manager.update(|c| c.test_mode = true).unwrap();
            manager
                .update(|c| c.target_groups = vec!["100".into(), "200".into()])
                .unwrap();
        }

        let manager = ConfigManager::open(&dir).unwrap();
        assert_eq!(manager.load_source(), LoadSource::Primary);
        assert!(manager.is_test_mode());
        assert_eq!(manager.target_groups(), ["100", "200"]);
        drop(manager);

        std::fs::write(dir.join(CONFIG_FILE_NAME), "enabled = [").unwrap();
        let manager = ConfigManager::open(&dir).unwrap();
        assert_eq!(manager.load_source(), LoadSource::Backup);
        // The backup predates the last update.
        assert!(manager.is_test_mode());
        assert!(manager.target_groups().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
