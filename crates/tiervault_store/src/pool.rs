//! # Code Pools
//!
//! A pool is a FIFO queue of unissued codes plus a record of every code it
//! has ever issued. Issued codes stay in `used` forever, revoked or not, so
//! a code can never come back as stock.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// Who received an issued code, and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedRecord {
    /// User the code was issued to.
    #[serde(alias = "qq")]
    pub consumer_id: String,
    /// Time of issue.
    #[serde(alias = "time", default, deserialize_with = "timestamp::lenient")]
    pub timestamp: NaiveDateTime,
    /// Set when the owning registration was reset. The code stays retired.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub revoked: bool,
}

/// Stock of one kind of code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodePool {
    /// Unissued codes, oldest first.
    unused: VecDeque<String>,
    /// Issued codes keyed by code.
    used: BTreeMap<String, UsedRecord>,
}

impl CodePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from already-normalized parts.
    #[must_use]
    pub fn from_parts(unused: VecDeque<String>, used: BTreeMap<String, UsedRecord>) -> Self {
        Self { unused, used }
    }

    /// Number of codes available to issue.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.unused.len()
    }

    /// Number of codes ever issued, revoked ones included.
    #[inline]
    #[must_use]
    pub fn issued(&self) -> usize {
        self.used.len()
    }

    /// Returns true if the code is in this pool, issued or not.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.used.contains_key(code) || self.unused.iter().any(|c| c == code)
    }

    /// Appends a code to the back of the queue.
    ///
    /// The caller is responsible for the global uniqueness check.
    pub(crate) fn push_unused(&mut self, code: String) {
        self.unused.push_back(code);
    }

    /// Issues the oldest code to `consumer_id`.
    ///
    /// A queued code that already has an issue record is discarded rather
    /// than issued twice.
    pub(crate) fn issue(&mut self, consumer_id: &str, now: NaiveDateTime) -> Option<String> {
        while let Some(code) = self.unused.pop_front() {
            if self.record_issue(code.clone(), consumer_id, now) {
                return Some(code);
            }
            tracing::warn!(code = %code, "Queued code was already issued, dropped");
        }
        None
    }

    /// Records a code as issued without taking it from the queue.
    ///
    /// Returns false, leaving the existing record untouched, if the code
    /// was issued before.
    #[must_use]
    pub(crate) fn record_issue(&mut self, code: String, consumer_id: &str, now: NaiveDateTime) -> bool {
        match self.used.entry(code) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(UsedRecord {
                    consumer_id: consumer_id.to_string(),
                    timestamp: now,
                    revoked: false,
                });
                true
            }
        }
    }

    /// Marks an issued code as revoked. Returns false if it was never issued here.
    pub(crate) fn revoke(&mut self, code: &str) -> bool {
        match self.used.get_mut(code) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    /// The issue record for a code.
    #[must_use]
    pub fn used_record(&self, code: &str) -> Option<&UsedRecord> {
        self.used.get(code)
    }

    /// Unissued codes, oldest first.
    pub fn unused(&self) -> impl Iterator<Item = &str> {
        self.unused.iter().map(String::as_str)
    }

    /// Issued codes and their records.
    pub fn used(&self) -> impl Iterator<Item = (&str, &UsedRecord)> {
        self.used.iter().map(|(code, record)| (code.as_str(), record))
    }

    /// Masked view of the next `limit` codes to be issued.
    #[must_use]
    pub fn preview(&self, limit: usize) -> Vec<String> {
        self.unused.iter().take(limit).map(|c| mask_preview(c)).collect()
    }
}

/// Masks a code for admin listings: `ABCD****YZ`, or `AB****` for short codes.
#[must_use]
pub fn mask_preview(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{head}****{tail}")
    } else {
        let head: String = chars.iter().take(2).collect();
        format!("{head}****")
    }
}
