//! # Audit Ledger and Draw History
//!
//! Both logs are newest-first ring buffers persisted inside the store
//! document. Neither ever holds a full code: the history keeps a masked
//! prefix, the audit log truncates free-text details.

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::tier::Tier;
use crate::timestamp;

/// Number of draw history entries kept.
pub const HISTORY_CAPACITY: usize = 100;

/// Number of audit entries kept.
pub const AUDIT_CAPACITY: usize = 500;

/// Details longer than this many characters are truncated.
pub const DETAIL_MAX_CHARS: usize = 20;

/// Characters kept from a truncated detail, before the ellipsis.
const DETAIL_KEEP_CHARS: usize = 15;

/// One redeemed draw, with the code masked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryHistoryEntry {
    /// Drawing user.
    #[serde(alias = "qq")]
    pub consumer_id: String,
    /// Tier won.
    pub tier: Tier,
    /// First four characters of the code plus a mask.
    pub code_hash: String,
    /// Time of the draw.
    #[serde(alias = "time", default, deserialize_with = "timestamp::lenient")]
    pub timestamp: NaiveDateTime,
}

/// One administrative or redemption action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Time of the action.
    #[serde(alias = "time", default, deserialize_with = "timestamp::lenient")]
    pub timestamp: NaiveDateTime,
    /// Short action name.
    pub action: String,
    /// Who performed it.
    #[serde(alias = "qq")]
    pub actor_id: String,
    /// Free-text detail, truncated.
    #[serde(default)]
    pub detail: String,
}

/// Newest-first bounded log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RingLog<T, const N: usize> {
    entries: VecDeque<T>,
}

impl<T, const N: usize> Default for RingLog<T, N> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T: Clone, const N: usize> RingLog<T, N> {
    /// Builds a log from newest-first entries, dropping anything past capacity.
    #[must_use]
    pub fn from_newest_first(entries: Vec<T>) -> Self {
        let mut entries: VecDeque<T> = entries.into();
        entries.truncate(N);
        Self { entries }
    }

    /// Prepends an entry and drops the oldest past capacity.
    pub fn push(&mut self, entry: T) {
        self.entries.push_front(entry);
        self.entries.truncate(N);
    }

    /// Copies of the newest `limit` entries.
    #[must_use]
    pub fn latest(&self, limit: usize) -> Vec<T> {
        self.entries.iter().take(limit).cloned().collect()
    }

    /// Number of entries held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been logged.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

/// Draw history.
pub type LotteryHistory = RingLog<LotteryHistoryEntry, HISTORY_CAPACITY>;

/// Audit log.
pub type AuditLog = RingLog<AuditLogEntry, AUDIT_CAPACITY>;

/// Masks a code for the draw history.
#[must_use]
pub fn redact_code(code: &str, test_mode: bool) -> String {
    if test_mode {
        return "TEST****".to_string();
    }
    let head: String = code.chars().take(4).collect();
    format!("{head}****")
}

/// Cuts a detail that might carry a code down to a harmless prefix.
#[must_use]
pub fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() > DETAIL_MAX_CHARS {
        let head: String = detail.chars().take(DETAIL_KEEP_CHARS).collect();
        format!("{head}...")
    } else {
        detail.to_string()
    }
}
