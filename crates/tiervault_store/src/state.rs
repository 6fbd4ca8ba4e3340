//! # Store State
//!
//! The in-memory aggregate. Everything the store persists lives in one
//! [`StoreState`], serialized as a single JSON document. Only the
//! transaction layer mutates it; readers get deep copies.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::clock::week_start;
use crate::ledger::{AuditLog, LotteryHistory};
use crate::pool::CodePool;
use crate::tier::{Tier, TierCounts};
use crate::timestamp;

/// Addresses one of the five code pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolId {
    /// Registration codes.
    Registration,
    /// A lottery tier; `Tier::Event` is the event card pool.
    Tier(Tier),
}

impl PoolId {
    /// Every pool, in the order codes are scanned for duplicates.
    pub const ALL: [Self; 5] = [
        Self::Registration,
        Self::Tier(Tier::Gold),
        Self::Tier(Tier::Purple),
        Self::Tier(Tier::Blue),
        Self::Tier(Tier::Event),
    ];

    /// Short name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Tier(t) => t.as_str(),
        }
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three regular lottery pools.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LotteryPools {
    /// Gold codes.
    pub gold: CodePool,
    /// Purple codes.
    pub purple: CodePool,
    /// Blue codes.
    pub blue: CodePool,
}

/// Time-limited event card pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventPool {
    /// Switched on by an admin, off by an admin or by expiry.
    pub enabled: bool,
    /// Display name.
    pub name: String,
    /// Raw end time as configured. Empty means no end.
    pub end_time: String,
    /// The cards.
    pub cards: CodePool,
}

/// Whether the event pool can hand out cards right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    /// Enabled and within its window.
    Active,
    /// Switched off.
    Disabled,
    /// Enabled but past its end time.
    Expired,
    /// Enabled with an end time that cannot be parsed.
    Unparsable,
}

impl EventStatus {
    /// Returns true if a correcting write should switch the pool off.
    #[must_use]
    pub const fn needs_disable(self) -> bool {
        matches!(self, Self::Expired | Self::Unparsable)
    }
}

impl EventPool {
    /// Evaluates availability at `now`. Unparsable end times fail closed.
    #[must_use]
    pub fn status(&self, now: NaiveDateTime) -> EventStatus {
        if !self.enabled {
            return EventStatus::Disabled;
        }
        if self.end_time.trim().is_empty() {
            return EventStatus::Active;
        }
        match timestamp::parse_end_time(&self.end_time) {
            Some(end) if now <= end => EventStatus::Active,
            Some(_) => EventStatus::Expired,
            None => EventStatus::Unparsable,
        }
    }
}

/// A single lottery configuration change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    /// Selection weight of a tier. Floor 1.
    Weight(Tier, u32),
    /// Blue draws in a row that trigger the guarantee. Floor 1.
    PityThreshold(u32),
    /// Tier the guarantee aims for.
    PityTier(Tier),
    /// Draws per calendar day, 0 for unlimited.
    DailyLimit(u32),
    /// Draws per ISO week, 0 for unlimited.
    WeeklyLimit(u32),
}

impl ConfigChange {
    /// Parses a `key = value` pair using the on-disk field names.
    ///
    /// Returns `None` for unknown keys or values that are not integers
    /// (or tier names, for `pity_tier`).
    #[must_use]
    pub fn parse(key: &str, value: &str) -> Option<Self> {
        let value = value.trim();
        let int = || value.parse::<u32>().ok();
        match key.trim() {
            "gold_weight" => int().map(|v| Self::Weight(Tier::Gold, v)),
            "purple_weight" => int().map(|v| Self::Weight(Tier::Purple, v)),
            "blue_weight" => int().map(|v| Self::Weight(Tier::Blue, v)),
            "event_weight" => int().map(|v| Self::Weight(Tier::Event, v)),
            "pity_threshold" => int().map(Self::PityThreshold),
            "pity_tier" => value.parse().ok().map(Self::PityTier),
            "daily_limit" => int().map(Self::DailyLimit),
            "weekly_limit" => int().map(Self::WeeklyLimit),
            _ => None,
        }
    }
}

/// Weights, pity and rate limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Gold weight, at least 1.
    pub gold_weight: u32,
    /// Purple weight, at least 1.
    pub purple_weight: u32,
    /// Blue weight, at least 1.
    pub blue_weight: u32,
    /// Event weight, at least 1.
    pub event_weight: u32,
    /// Consecutive blue draws that trigger the guarantee, at least 1.
    pub pity_threshold: u32,
    /// Tier the guarantee aims for.
    pub pity_tier: Tier,
    /// Draws per day, 0 for unlimited.
    pub daily_limit: u32,
    /// Draws per week, 0 for unlimited.
    pub weekly_limit: u32,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            gold_weight: 5,
            purple_weight: 20,
            blue_weight: 75,
            event_weight: 10,
            pity_threshold: 10,
            pity_tier: Tier::Purple,
            daily_limit: 0,
            weekly_limit: 1,
        }
    }
}

impl LotteryConfig {
    /// Effective weight of a tier, never below 1.
    #[inline]
    #[must_use]
    pub fn weight(&self, tier: Tier) -> u64 {
        let raw = match tier {
            Tier::Gold => self.gold_weight,
            Tier::Purple => self.purple_weight,
            Tier::Blue => self.blue_weight,
            Tier::Event => self.event_weight,
        };
        u64::from(raw.max(1))
    }

    /// Applies a change if it respects the field's floor.
    ///
    /// Returns false and leaves the config untouched otherwise.
    pub fn apply(&mut self, change: ConfigChange) -> bool {
        match change {
            ConfigChange::Weight(_, 0) | ConfigChange::PityThreshold(0) => return false,
            ConfigChange::Weight(Tier::Gold, v) => self.gold_weight = v,
            ConfigChange::Weight(Tier::Purple, v) => self.purple_weight = v,
            ConfigChange::Weight(Tier::Blue, v) => self.blue_weight = v,
            ConfigChange::Weight(Tier::Event, v) => self.event_weight = v,
            ConfigChange::PityThreshold(v) => self.pity_threshold = v,
            ConfigChange::PityTier(t) => self.pity_tier = t,
            ConfigChange::DailyLimit(v) => self.daily_limit = v,
            ConfigChange::WeeklyLimit(v) => self.weekly_limit = v,
        }
        true
    }
}

/// Per-user draw counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLotteryRecord {
    /// Consecutive blue draws since the last non-blue.
    #[serde(default)]
    pub pity_count: u32,
    /// Lifetime draws.
    #[serde(default)]
    pub total_draws: u64,
    /// Draws in the ISO week of `last_draw`.
    #[serde(default)]
    pub week_draws: u32,
    /// Draws on `last_draw_date`.
    #[serde(default)]
    pub day_draws: u32,
    /// Time of the most recent draw.
    #[serde(default, deserialize_with = "timestamp::lenient_option")]
    pub last_draw: Option<NaiveDateTime>,
    /// Calendar day of the most recent draw.
    #[serde(default, deserialize_with = "timestamp::lenient_date")]
    pub last_draw_date: Option<NaiveDate>,
}

impl UserLotteryRecord {
    /// `(day_draws, week_draws)` as they would be after rolling over to `now`.
    #[must_use]
    pub fn counters_at(&self, now: NaiveDateTime) -> (u32, u32) {
        let today = now.date();
        let day = if self.last_draw_date == Some(today) {
            self.day_draws
        } else {
            0
        };
        let week = match self.last_draw {
            Some(last) if week_start(last.date()) < week_start(today) => 0,
            _ => self.week_draws,
        };
        (day, week)
    }

    /// Resets day and week counters that belong to an earlier period.
    pub fn roll_over(&mut self, now: NaiveDateTime) {
        let (day, week) = self.counters_at(now);
        self.day_draws = day;
        self.week_draws = week;
    }

    /// Records a draw of `tier` at `now`.
    pub fn record_draw(&mut self, tier: Tier, now: NaiveDateTime) {
        self.total_draws = self.total_draws.saturating_add(1);
        self.week_draws = self.week_draws.saturating_add(1);
        self.day_draws = self.day_draws.saturating_add(1);
        self.last_draw = Some(now);
        self.last_draw_date = Some(now.date());
        if tier.is_lowest() {
            self.pity_count = self.pity_count.saturating_add(1);
        } else {
            self.pity_count = 0;
        }
    }
}

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    /// Code issued at registration; `None` for imported users.
    #[serde(default)]
    pub reg_code: Option<String>,
    /// When the user was registered or imported.
    #[serde(default, deserialize_with = "timestamp::lenient")]
    pub reg_time: NaiveDateTime,
    /// Marked registered by bulk import, no code consumed.
    #[serde(default)]
    pub imported: bool,
}

/// Broadcast text shown to users.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Text, empty when cleared.
    #[serde(default)]
    pub content: String,
    /// When it was set.
    #[serde(default, deserialize_with = "timestamp::lenient_option")]
    pub time: Option<NaiveDateTime>,
}

/// The whole persisted aggregate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreState {
    /// Registration code stock.
    pub registration_codes: CodePool,
    /// Regular lottery stock.
    pub lottery_pool: LotteryPools,
    /// Event card stock and window.
    pub event_pool: EventPool,
    /// Weights, pity and limits.
    pub lottery_config: LotteryConfig,
    /// Most recent draws, masked.
    pub lottery_history: LotteryHistory,
    /// Draw counters per user.
    pub user_lottery: BTreeMap<String, UserLotteryRecord>,
    /// Registered users.
    pub registered_users: BTreeMap<String, RegisteredUser>,
    /// Users barred from registering and drawing.
    pub blacklist: BTreeSet<String>,
    /// Audit log.
    pub logs: AuditLog,
    /// Current announcement.
    pub announcement: Announcement,
}

impl StoreState {
    /// Shared view of a pool.
    #[must_use]
    pub fn pool(&self, id: PoolId) -> &CodePool {
        match id {
            PoolId::Registration => &self.registration_codes,
            PoolId::Tier(Tier::Gold) => &self.lottery_pool.gold,
            PoolId::Tier(Tier::Purple) => &self.lottery_pool.purple,
            PoolId::Tier(Tier::Blue) => &self.lottery_pool.blue,
            PoolId::Tier(Tier::Event) => &self.event_pool.cards,
        }
    }

    pub(crate) fn pool_mut(&mut self, id: PoolId) -> &mut CodePool {
        match id {
            PoolId::Registration => &mut self.registration_codes,
            PoolId::Tier(Tier::Gold) => &mut self.lottery_pool.gold,
            PoolId::Tier(Tier::Purple) => &mut self.lottery_pool.purple,
            PoolId::Tier(Tier::Blue) => &mut self.lottery_pool.blue,
            PoolId::Tier(Tier::Event) => &mut self.event_pool.cards,
        }
    }

    /// Returns true if `code` is anywhere in the global namespace.
    #[must_use]
    pub fn contains_code(&self, code: &str) -> bool {
        PoolId::ALL.iter().any(|&id| self.pool(id).contains(code))
    }

    /// Available stock per tier. Event stock counts only if `event_available`.
    #[must_use]
    pub fn stock(&self, event_available: bool) -> TierCounts {
        let mut counts = TierCounts::new();
        for tier in Tier::REGULAR {
            counts.set(tier, self.pool(PoolId::Tier(tier)).available() as u64);
        }
        if event_available {
            counts.set(Tier::Event, self.event_pool.cards.available() as u64);
        }
        counts
    }
}
