//! # Schema Migration and Validation
//!
//! Runs once per load, between JSON decoding and handing the state to the
//! store. It is lenient at the leaves and strict about the outline:
//!
//! - A section with the wrong JSON type fails the decode, so the loader
//!   falls back to the backup.
//! - A bad leaf (config value, user record, log line) is corrected or
//!   dropped, with a warning.
//!
//! ## Corrections
//!
//! | Input | Result |
//! |-------|--------|
//! | `used` as `consumer_id -> code` | inverted to `code -> {consumer_id, timestamp}` |
//! | weight / `pity_threshold` not an integer >= 1 | default |
//! | `daily_limit` / `weekly_limit` not an integer >= 0 | default |
//! | `pity_tier` not a tier name | default |
//! | `event_pool.enabled` not a boolean | `false` |
//! | unused code already present elsewhere | dropped |
//!
//! Migrating an already-migrated document changes nothing.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::ledger::{AuditLog, AuditLogEntry, LotteryHistory, LotteryHistoryEntry};
use crate::pool::{CodePool, UsedRecord};
use crate::state::{
    Announcement, EventPool, LotteryConfig, LotteryPools, PoolId, RegisteredUser, StoreState,
    UserLotteryRecord,
};
use crate::tier::Tier;

/// A pool as it may appear on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPool {
    unused: Vec<Value>,
    used: BTreeMap<String, Value>,
}

/// Regular pools as they may appear on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawLotteryPools {
    gold: RawPool,
    purple: RawPool,
    blue: RawPool,
}

/// Event pool as it may appear on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawEventPool {
    enabled: Option<Value>,
    name: Option<Value>,
    end_time: Option<Value>,
    cards: RawPool,
}

/// Lottery config as it may appear on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawLotteryConfig {
    gold_weight: Option<Value>,
    purple_weight: Option<Value>,
    blue_weight: Option<Value>,
    event_weight: Option<Value>,
    pity_threshold: Option<Value>,
    pity_tier: Option<Value>,
    daily_limit: Option<Value>,
    weekly_limit: Option<Value>,
}

/// The data document before validation.
///
/// Missing sections take their defaults. Unknown top-level keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDocument {
    registration_codes: RawPool,
    lottery_pool: RawLotteryPools,
    event_pool: RawEventPool,
    lottery_config: RawLotteryConfig,
    lottery_history: Vec<Value>,
    user_lottery: BTreeMap<String, Value>,
    registered_users: BTreeMap<String, Value>,
    blacklist: Vec<Value>,
    logs: Vec<Value>,
    announcement: Option<Value>,
}

/// What a migration changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy `consumer_id -> code` entries inverted.
    pub legacy_used_entries: usize,
    /// Config or flag fields replaced by defaults.
    pub config_corrections: usize,
    /// Unused codes dropped as duplicates.
    pub duplicate_codes_dropped: usize,
    /// Records or entries that could not be read and were dropped.
    pub malformed_entries_dropped: usize,
}

impl MigrationReport {
    /// Returns true if the document needed no changes.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Upgrades and validates a raw document.
///
/// `now` stamps entries inverted from the legacy index, which carried no
/// time of their own.
#[must_use]
pub fn migrate(raw: RawDocument, now: NaiveDateTime) -> (StoreState, MigrationReport) {
    let mut report = MigrationReport::default();

    let RawDocument {
        registration_codes,
        lottery_pool,
        event_pool,
        lottery_config,
        lottery_history,
        user_lottery,
        registered_users,
        blacklist,
        logs,
        announcement,
    } = raw;

    let mut pools = [
        (PoolId::Registration, registration_codes),
        (PoolId::Tier(Tier::Gold), lottery_pool.gold),
        (PoolId::Tier(Tier::Purple), lottery_pool.purple),
        (PoolId::Tier(Tier::Blue), lottery_pool.blue),
        (PoolId::Tier(Tier::Event), event_pool.cards),
    ]
    .map(|(id, raw)| (id, migrate_used(id, raw.used, now, &mut report), raw.unused));

    // Every issued code anywhere takes precedence over any unused copy.
    let mut seen: HashSet<String> = pools
        .iter()
        .flat_map(|(_, used, _)| used.keys().cloned())
        .collect();

    let mut built: Vec<CodePool> = Vec::with_capacity(pools.len());
    for (id, used, unused) in &mut pools {
        let mut queue = VecDeque::with_capacity(unused.len());
        for value in unused.drain(..) {
            let Value::String(code) = value else {
                tracing::warn!(pool = %id, "Dropping non-string code");
                report.malformed_entries_dropped += 1;
                continue;
            };
            if !seen.insert(code.clone()) {
                tracing::warn!(pool = %id, "Dropping duplicate unused code");
                report.duplicate_codes_dropped += 1;
                continue;
            }
            queue.push_back(code);
        }
        built.push(CodePool::from_parts(queue, std::mem::take(used)));
    }
    let mut built = built.into_iter();
    let mut next_pool = || built.next().unwrap_or_default();

    let registration_codes = next_pool();
    let lottery_pool = LotteryPools {
        gold: next_pool(),
        purple: next_pool(),
        blue: next_pool(),
    };
    let cards = next_pool();

    let enabled = match event_pool.enabled {
        Some(Value::Bool(b)) => b,
        None => false,
        Some(other) => {
            tracing::warn!(value = %other, "event_pool.enabled is not a boolean, using false");
            report.config_corrections += 1;
            false
        }
    };
    let event_pool = EventPool {
        enabled,
        name: string_or_empty(event_pool.name),
        end_time: string_or_empty(event_pool.end_time),
        cards,
    };

    let state = StoreState {
        registration_codes,
        lottery_pool,
        event_pool,
        lottery_config: migrate_config(lottery_config, &mut report),
        lottery_history: LotteryHistory::from_newest_first(decode_entries::<LotteryHistoryEntry>(
            "lottery_history",
            lottery_history,
            &mut report,
        )),
        user_lottery: decode_map::<UserLotteryRecord>("user_lottery", user_lottery, &mut report),
        registered_users: decode_map::<RegisteredUser>(
            "registered_users",
            registered_users,
            &mut report,
        ),
        blacklist: migrate_blacklist(blacklist, &mut report),
        logs: AuditLog::from_newest_first(decode_entries::<AuditLogEntry>(
            "logs",
            logs,
            &mut report,
        )),
        announcement: announcement
            .and_then(|v| serde_json::from_value::<Announcement>(v).ok())
            .unwrap_or_default(),
    };

    if report.legacy_used_entries > 0 {
        tracing::info!(
            entries = report.legacy_used_entries,
            "Migrated legacy used index to code -> record"
        );
    }

    (state, report)
}

/// Normalizes a `used` map, inverting legacy `consumer_id -> code` entries.
fn migrate_used(
    id: PoolId,
    used: BTreeMap<String, Value>,
    now: NaiveDateTime,
    report: &mut MigrationReport,
) -> BTreeMap<String, UsedRecord> {
    let mut out = BTreeMap::new();
    for (key, value) in used {
        match value {
            Value::String(code) => {
                report.legacy_used_entries += 1;
                out.insert(
                    code,
                    UsedRecord {
                        consumer_id: key,
                        timestamp: now,
                        revoked: false,
                    },
                );
            }
            other => {
                // Anything else under a code key still retires that code.
                let record = serde_json::from_value::<UsedRecord>(other).unwrap_or_else(|e| {
                    tracing::warn!(pool = %id, error = %e, "Unreadable used record, keeping the code retired");
                    report.malformed_entries_dropped += 1;
                    UsedRecord {
                        consumer_id: String::new(),
                        timestamp: now,
                        revoked: false,
                    }
                });
                out.insert(key, record);
            }
        }
    }
    out
}

/// Coerces a JSON value to an integer the way a lenient reader would.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn checked_field(
    name: &str,
    raw: Option<Value>,
    floor: i64,
    default: u32,
    report: &mut MigrationReport,
) -> u32 {
    let Some(value) = raw else {
        return default;
    };
    match coerce_int(&value)
        .filter(|v| *v >= floor)
        .and_then(|v| u32::try_from(v).ok())
    {
        Some(v) => v,
        None => {
            tracing::warn!(
                field = name,
                value = %value,
                default,
                "lottery_config value out of range, using default"
            );
            report.config_corrections += 1;
            default
        }
    }
}

fn migrate_config(raw: RawLotteryConfig, report: &mut MigrationReport) -> LotteryConfig {
    let d = LotteryConfig::default();
    let pity_tier = match raw.pity_tier {
        None => d.pity_tier,
        Some(value) => match value.as_str().and_then(|s| s.parse::<Tier>().ok()) {
            Some(tier) => tier,
            None => {
                tracing::warn!(value = %value, default = %d.pity_tier, "lottery_config.pity_tier invalid, using default");
                report.config_corrections += 1;
                d.pity_tier
            }
        },
    };
    LotteryConfig {
        gold_weight: checked_field("gold_weight", raw.gold_weight, 1, d.gold_weight, report),
        purple_weight: checked_field("purple_weight", raw.purple_weight, 1, d.purple_weight, report),
        blue_weight: checked_field("blue_weight", raw.blue_weight, 1, d.blue_weight, report),
        event_weight: checked_field("event_weight", raw.event_weight, 1, d.event_weight, report),
        pity_threshold: checked_field(
            "pity_threshold",
            raw.pity_threshold,
            1,
            d.pity_threshold,
            report,
        ),
        pity_tier,
        daily_limit: checked_field("daily_limit", raw.daily_limit, 0, d.daily_limit, report),
        weekly_limit: checked_field("weekly_limit", raw.weekly_limit, 0, d.weekly_limit, report),
    }
}

fn migrate_blacklist(raw: Vec<Value>, report: &mut MigrationReport) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for value in raw {
        match value {
            Value::String(id) => {
                out.insert(id);
            }
            Value::Number(n) => {
                out.insert(n.to_string());
            }
            _ => report.malformed_entries_dropped += 1,
        }
    }
    out
}

fn decode_entries<T: serde::de::DeserializeOwned>(
    section: &str,
    raw: Vec<Value>,
    report: &mut MigrationReport,
) -> Vec<T> {
    raw.into_iter()
        .filter_map(|v| match serde_json::from_value::<T>(v) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(section, error = %e, "Dropping unreadable entry");
                report.malformed_entries_dropped += 1;
                None
            }
        })
        .collect()
}

fn decode_map<T: serde::de::DeserializeOwned>(
    section: &str,
    raw: BTreeMap<String, Value>,
    report: &mut MigrationReport,
) -> BTreeMap<String, T> {
    raw.into_iter()
        .filter_map(|(key, v)| match serde_json::from_value::<T>(v) {
            Ok(record) => Some((key, record)),
            Err(e) => {
                tracing::warn!(section, user = %key, error = %e, "Dropping unreadable record");
                report.malformed_entries_dropped += 1;
                None
            }
        })
        .collect()
}

fn string_or_empty(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}
