//! # TIERVAULT
//!
//! Host-side glue around [`tiervault_store`]: the plugin configuration
//! file, admin reports, import parsing and logging bootstrap. The
//! `tiervault_admin` binary drives a data directory from the command line.
//!
//! The store owns every inventory rule. This crate decides *when* to call
//! it (master switch, test mode) and how to present the results.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod import;
pub mod plugin_config;
pub mod reports;
pub mod telemetry;

pub use error::{HostError, HostResult};
pub use import::{parse_codes, parse_user_ids, read_import_file, ImportList};
pub use plugin_config::{ConfigManager, ExchangeTime, ExchangeWindow, PluginConfig, CONFIG_FILE_NAME};
pub use reports::{
    export_line, export_users, stock_alerts, FileStatus, HealthReport, StockAlert,
    EXPORT_BATCH_SIZE, GOLD_ALERT_FLOOR, PURPLE_ALERT_FLOOR,
};

/// Actor recorded for admin commands in the audit log.
pub const ADMIN_ACTOR: &str = "ADMIN";
