//! # Store Transactions
//!
//! A [`Transaction`] is a view of the state held while the store lock is
//! taken. Every operation is a method on it, so several operations can run
//! inside one critical section without re-locking:
//!
//! ```ignore
//! store.transaction(|tx| {
//!     let outcome = tx.register("10001", false);
//!     if outcome.is_success() {
//!         tx.log_action("register", "10001", "code issued");
//!     }
//!     outcome
//! })?;
//! ```
//!
//! Methods record whether they changed anything; the store persists once,
//! after the closure returns and before the lock is released.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use rand_chacha::ChaCha20Rng;

use crate::allocation::{AllocationEngine, TierDecision};
use crate::clock::Clock;
use crate::ledger::{redact_code, truncate_detail, AuditLogEntry, LotteryHistoryEntry};
use crate::outcome::{
    DrawCheck, DrawOutcome, DrawRejection, EventPoolInfo, ImportReport, RegisterOutcome,
    StoreStatistics, UserEntry,
};
use crate::state::{
    Announcement, ConfigChange, EventStatus, LotteryConfig, PoolId, RegisteredUser, StoreState,
    UserLotteryRecord,
};
use crate::tier::{Tier, TierCounts};

/// Actor recorded for entries the store writes on its own.
pub const SYSTEM_ACTOR: &str = "AUTO";

/// Exclusive access to the store state for one critical section.
pub struct Transaction<'a> {
    state: &'a mut StoreState,
    rng: &'a mut ChaCha20Rng,
    clock: &'a dyn Clock,
    dirty: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        state: &'a mut StoreState,
        rng: &'a mut ChaCha20Rng,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            state,
            rng,
            clock,
            dirty: false,
        }
    }

    /// Returns true if any operation changed the state.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The state as it stands inside this transaction.
    #[must_use]
    pub fn state(&self) -> &StoreState {
        &*self.state
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Issues a registration code to `user_id`, at most once per user.
    ///
    /// In test mode a placeholder `TEST-REG-<user>` is recorded instead of
    /// consuming stock. If that name is already taken anywhere, a `-<n>`
    /// suffix is appended until it is free.
    pub fn register(&mut self, user_id: &str, test_mode: bool) -> RegisterOutcome {
        if self.state.blacklist.contains(user_id) {
            return RegisterOutcome::Blacklisted;
        }
        if let Some(existing) = self.state.registered_users.get(user_id) {
            return RegisterOutcome::AlreadyRegistered {
                code: existing.reg_code.clone(),
            };
        }

        let now = self.now();
        let code = if test_mode {
            self.issue_placeholder(user_id, now)
        } else {
            match self.state.pool_mut(PoolId::Registration).issue(user_id, now) {
                Some(code) => code,
                None => {
                    tracing::info!(user = user_id, "Registration refused, no stock");
                    return RegisterOutcome::NoStock;
                }
            }
        };

        self.state.registered_users.insert(
            user_id.to_string(),
            RegisteredUser {
                reg_code: Some(code.clone()),
                reg_time: now,
                imported: false,
            },
        );
        self.dirty = true;
        tracing::info!(user = user_id, test_mode, "User registered");
        RegisterOutcome::Registered { code }
    }

    fn issue_placeholder(&mut self, user_id: &str, now: NaiveDateTime) -> String {
        let base = format!("TEST-REG-{user_id}");
        let mut code = base.clone();
        let mut suffix = 1u32;
        loop {
            if !self.state.contains_code(&code)
                && self
                    .state
                    .pool_mut(PoolId::Registration)
                    .record_issue(code.clone(), user_id, now)
            {
                return code;
            }
            suffix += 1;
            code = format!("{base}-{suffix}");
        }
    }

    /// Removes a registration. The issued code stays retired, flagged revoked.
    pub fn reset_user_registration(&mut self, user_id: &str) -> bool {
        let Some(user) = self.state.registered_users.remove(user_id) else {
            return false;
        };
        if let Some(code) = user.reg_code.as_deref() {
            self.state.pool_mut(PoolId::Registration).revoke(code);
        }
        self.dirty = true;
        tracing::info!(user = user_id, "Registration reset");
        true
    }

    /// Marks users registered without consuming codes.
    pub fn import_registered_users<I, S>(&mut self, user_ids: I) -> ImportReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = self.now();
        let mut report = ImportReport::default();
        for id in user_ids {
            let id = id.as_ref().trim();
            if id.is_empty() {
                continue;
            }
            if self.state.registered_users.contains_key(id) {
                report.skipped += 1;
                continue;
            }
            self.state.registered_users.insert(
                id.to_string(),
                RegisteredUser {
                    reg_code: None,
                    reg_time: now,
                    imported: true,
                },
            );
            report.added += 1;
        }
        if report.added > 0 {
            self.dirty = true;
        }
        report
    }

    // =========================================================================
    // Lottery
    // =========================================================================

    /// Runs one complete draw: eligibility, tier choice, code issue, ledger.
    pub fn draw_lottery(&mut self, user_id: &str, test_mode: bool) -> DrawOutcome {
        if self.state.blacklist.contains(user_id) {
            return DrawOutcome::Rejected(DrawRejection::Blacklisted);
        }

        let now = self.now();
        let config = self.state.lottery_config;

        // Lazy record and calendar rollover
        let mut created = false;
        let record = self
            .state
            .user_lottery
            .entry(user_id.to_string())
            .or_insert_with(|| {
                created = true;
                UserLotteryRecord::default()
            });
        let before = (record.day_draws, record.week_draws);
        record.roll_over(now);
        let (day_draws, week_draws, pity_count) =
            (record.day_draws, record.week_draws, record.pity_count);
        if created || before != (day_draws, week_draws) {
            self.dirty = true;
        }

        if config.weekly_limit > 0 && week_draws >= config.weekly_limit {
            return DrawOutcome::Rejected(DrawRejection::WeeklyLimitReached);
        }
        if config.daily_limit > 0 && day_draws >= config.daily_limit {
            return DrawOutcome::Rejected(DrawRejection::DailyLimitReached);
        }

        let event_available = self.refresh_event(now);
        let stock = self.state.stock(event_available);
        if stock.total() == 0 {
            tracing::info!(user = user_id, "Draw refused, every pool is empty");
            return DrawOutcome::Rejected(DrawRejection::PoolEmpty);
        }

        let decision = AllocationEngine::new(&config).decide(&stock, pity_count, &mut *self.rng);
        let (tier, pity_triggered) = match decision {
            TierDecision::Weighted(t) => (t, false),
            TierDecision::Pity(t) => (t, true),
            TierDecision::PitySoldOut => {
                tracing::warn!(user = user_id, pity_count, "Pity fired but higher tiers are sold out");
                return DrawOutcome::Rejected(DrawRejection::PitySoldOut);
            }
            TierDecision::Empty => return DrawOutcome::Rejected(DrawRejection::PoolEmpty),
        };

        let code = if test_mode {
            format!(
                "TEST-{}-{user_id}-{}",
                tier.as_str().to_ascii_uppercase(),
                now.format("%H%M%S")
            )
        } else {
            match self.state.pool_mut(PoolId::Tier(tier)).issue(user_id, now) {
                Some(code) => code,
                None => return DrawOutcome::Rejected(DrawRejection::PoolEmpty),
            }
        };

        if let Some(record) = self.state.user_lottery.get_mut(user_id) {
            record.record_draw(tier, now);
        }
        self.state.lottery_history.push(LotteryHistoryEntry {
            consumer_id: user_id.to_string(),
            tier,
            code_hash: redact_code(&code, test_mode),
            timestamp: now,
        });
        self.dirty = true;

        tracing::info!(user = user_id, %tier, pity_triggered, test_mode, "Draw completed");
        DrawOutcome::Won {
            tier,
            code,
            pity_triggered,
        }
    }

    /// Whether the limits allow `user_id` to draw now. Changes nothing.
    #[must_use]
    pub fn can_draw(&self, user_id: &str) -> DrawCheck {
        if self.state.blacklist.contains(user_id) {
            return DrawCheck::Denied(DrawRejection::Blacklisted);
        }
        let Some(record) = self.state.user_lottery.get(user_id) else {
            return DrawCheck::Allowed;
        };
        let config = &self.state.lottery_config;
        let (day_draws, week_draws) = record.counters_at(self.now());
        if config.weekly_limit > 0 && week_draws >= config.weekly_limit {
            return DrawCheck::Denied(DrawRejection::WeeklyLimitReached);
        }
        if config.daily_limit > 0 && day_draws >= config.daily_limit {
            return DrawCheck::Denied(DrawRejection::DailyLimitReached);
        }
        DrawCheck::Allowed
    }

    /// Zeroes an existing user's draw counters and pity.
    pub fn reset_user_lottery(&mut self, user_id: &str) -> bool {
        match self.state.user_lottery.get_mut(user_id) {
            Some(record) => {
                *record = UserLotteryRecord::default();
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Zeroes every user's weekly counter and logs it. Returns users touched.
    pub fn weekly_reset(&mut self) -> usize {
        for record in self.state.user_lottery.values_mut() {
            record.week_draws = 0;
        }
        let users = self.state.user_lottery.len();
        self.dirty = true;
        self.log_action("weekly_reset", SYSTEM_ACTOR, &format!("{users} users"));
        tracing::info!(users, "Weekly counters reset");
        users
    }

    /// Applies a config change if it respects the field's floor.
    pub fn update_lottery_config(&mut self, change: ConfigChange) -> bool {
        if self.state.lottery_config.apply(change) {
            self.dirty = true;
            tracing::info!(?change, "Lottery config updated");
            true
        } else {
            tracing::warn!(?change, "Lottery config change rejected");
            false
        }
    }

    // =========================================================================
    // Stock
    // =========================================================================

    /// Appends codes to a pool, skipping blanks and codes already present anywhere.
    pub fn add_codes<I, S>(&mut self, pool: PoolId, codes: I) -> ImportReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known: HashSet<String> = PoolId::ALL
            .iter()
            .flat_map(|&id| {
                let p = self.state.pool(id);
                p.unused()
                    .map(str::to_string)
                    .chain(p.used().map(|(c, _)| c.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut report = ImportReport::default();
        for code in codes {
            let code = code.as_ref().trim();
            if code.is_empty() {
                continue;
            }
            if !known.insert(code.to_string()) {
                report.skipped += 1;
                continue;
            }
            self.state.pool_mut(pool).push_unused(code.to_string());
            report.added += 1;
        }
        if report.added > 0 {
            self.dirty = true;
        }
        tracing::info!(%pool, added = report.added, skipped = report.skipped, "Codes imported");
        report
    }

    /// Adds registration codes.
    pub fn add_registration_codes<I, S>(&mut self, codes: I) -> ImportReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_codes(PoolId::Registration, codes)
    }

    /// Adds codes to a lottery tier. `Tier::Event` feeds the event pool.
    pub fn add_lottery_codes<I, S>(&mut self, tier: Tier, codes: I) -> ImportReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_codes(PoolId::Tier(tier), codes)
    }

    /// Adds event cards.
    pub fn add_event_codes<I, S>(&mut self, codes: I) -> ImportReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_codes(PoolId::Tier(Tier::Event), codes)
    }

    // =========================================================================
    // Event pool
    // =========================================================================

    /// Disables the event pool if it has expired or its end time is bad.
    ///
    /// Returns true if the pool can hand out cards.
    fn refresh_event(&mut self, now: NaiveDateTime) -> bool {
        let status = self.state.event_pool.status(now);
        if status.needs_disable() {
            self.state.event_pool.enabled = false;
            self.dirty = true;
            tracing::warn!(
                name = %self.state.event_pool.name,
                end_time = %self.state.event_pool.end_time,
                ?status,
                "Event pool switched off"
            );
        }
        status == EventStatus::Active
    }

    /// Whether the event pool is live, switching it off if it has lapsed.
    pub fn is_event_pool_active(&mut self) -> bool {
        let now = self.now();
        self.refresh_event(now)
    }

    /// Opens the event pool. An empty `end_time` means no end.
    pub fn set_event_pool(&mut self, name: &str, end_time: &str) {
        let event = &mut self.state.event_pool;
        event.enabled = true;
        event.name = name.to_string();
        event.end_time = end_time.trim().to_string();
        self.dirty = true;
    }

    /// Closes the event pool. Cards stay in stock.
    pub fn disable_event_pool(&mut self) {
        self.state.event_pool.enabled = false;
        self.dirty = true;
    }

    // =========================================================================
    // Blacklist and announcement
    // =========================================================================

    /// Returns false if the user was already listed.
    pub fn add_to_blacklist(&mut self, user_id: &str) -> bool {
        let added = self.state.blacklist.insert(user_id.to_string());
        self.dirty |= added;
        added
    }

    /// Returns false if the user was not listed.
    pub fn remove_from_blacklist(&mut self, user_id: &str) -> bool {
        let removed = self.state.blacklist.remove(user_id);
        self.dirty |= removed;
        removed
    }

    /// Empties the blacklist and returns how many were removed.
    pub fn clear_blacklist(&mut self) -> usize {
        let n = self.state.blacklist.len();
        self.state.blacklist.clear();
        self.dirty = true;
        n
    }

    /// Replaces the announcement and stamps it with the current time.
    pub fn set_announcement(&mut self, content: &str) {
        self.state.announcement = Announcement {
            content: content.to_string(),
            time: Some(self.now()),
        };
        self.dirty = true;
    }

    /// Clears the announcement.
    pub fn clear_announcement(&mut self) {
        self.state.announcement = Announcement::default();
        self.dirty = true;
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Prepends an audit entry. Long details are truncated.
    pub fn log_action(&mut self, action: &str, actor_id: &str, detail: &str) {
        let entry = AuditLogEntry {
            timestamp: self.now(),
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            detail: truncate_detail(detail),
        };
        self.state.logs.push(entry);
        self.dirty = true;
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Returns true if the user holds a registration.
    #[must_use]
    pub fn is_registered(&self, user_id: &str) -> bool {
        self.state.registered_users.contains_key(user_id)
    }

    /// Registration record of a user.
    #[must_use]
    pub fn user_info(&self, user_id: &str) -> Option<RegisteredUser> {
        self.state.registered_users.get(user_id).cloned()
    }

    /// Draw counters of a user; zeroes if they never drew.
    #[must_use]
    pub fn user_lottery_data(&self, user_id: &str) -> UserLotteryRecord {
        self.state
            .user_lottery
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Unissued stock per tier; event counts while the pool is enabled.
    #[must_use]
    pub fn pool_counts(&self) -> TierCounts {
        self.state.stock(self.state.event_pool.enabled)
    }

    /// Current lottery config.
    #[must_use]
    pub fn lottery_config(&self) -> LotteryConfig {
        self.state.lottery_config
    }

    /// Newest draw history entries.
    #[must_use]
    pub fn lottery_history(&self, limit: usize) -> Vec<LotteryHistoryEntry> {
        self.state.lottery_history.latest(limit)
    }

    /// Newest audit entries.
    #[must_use]
    pub fn logs(&self, limit: usize) -> Vec<AuditLogEntry> {
        self.state.logs.latest(limit)
    }

    /// Event pool summary, as stored.
    #[must_use]
    pub fn event_pool_info(&self) -> EventPoolInfo {
        let event = &self.state.event_pool;
        EventPoolInfo {
            enabled: event.enabled,
            name: event.name.clone(),
            end_time: event.end_time.clone(),
            stock: event.cards.available(),
        }
    }

    /// Returns true if the user is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, user_id: &str) -> bool {
        self.state.blacklist.contains(user_id)
    }

    /// Blacklisted users, sorted.
    #[must_use]
    pub fn blacklist(&self) -> Vec<String> {
        self.state.blacklist.iter().cloned().collect()
    }

    /// Current announcement.
    #[must_use]
    pub fn announcement(&self) -> Announcement {
        self.state.announcement.clone()
    }

    /// Number of registered users.
    #[must_use]
    pub fn registered_user_count(&self) -> usize {
        self.state.registered_users.len()
    }

    /// Up to `limit` registered users, ordered by id.
    #[must_use]
    pub fn registered_users(&self, limit: usize) -> Vec<UserEntry> {
        self.state
            .registered_users
            .iter()
            .take(limit)
            .map(|(id, record)| UserEntry {
                user_id: id.clone(),
                record: record.clone(),
            })
            .collect()
    }

    /// Every registered user, ordered by id.
    #[must_use]
    pub fn all_registered_users(&self) -> Vec<UserEntry> {
        self.registered_users(usize::MAX)
    }

    /// Masked view of the next codes in a pool.
    #[must_use]
    pub fn codes_preview(&self, pool: PoolId, limit: usize) -> Vec<String> {
        self.state.pool(pool).preview(limit)
    }

    /// Dashboard figures.
    #[must_use]
    pub fn statistics(&self) -> StoreStatistics {
        let mut tier_draws = TierCounts::new();
        for entry in self.state.lottery_history.iter() {
            tier_draws.increment(entry.tier);
        }
        StoreStatistics {
            registered_users: self.state.registered_users.len(),
            registration_unused: self.state.registration_codes.available(),
            registration_used: self.state.registration_codes.issued(),
            tier_stock: self.pool_counts(),
            tier_draws,
            blacklist_count: self.state.blacklist.len(),
            total_draws: self
                .state
                .user_lottery
                .values()
                .map(|r| r.total_draws)
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, NaiveDate};
    use rand::SeedableRng;

    struct Fixture {
        state: StoreState,
        rng: ChaCha20Rng,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            // Wednesday
            let start = NaiveDate::from_ymd_opt(2024, 3, 6)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap();
            Self {
                state: StoreState::default(),
                rng: ChaCha20Rng::seed_from_u64(11),
                clock: ManualClock::new(start),
            }
        }

        fn tx(&mut self) -> Transaction<'_> {
            Transaction::new(&mut self.state, &mut self.rng, &self.clock)
        }
    }

    #[test]
    fn test_register_sequence() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["A", "B"]);

        assert_eq!(
            tx.register("u1", false),
            RegisterOutcome::Registered { code: "A".into() }
        );
        assert_eq!(
            tx.register("u1", false),
            RegisterOutcome::AlreadyRegistered {
                code: Some("A".into())
            }
        );
        assert_eq!(tx.register("u2", false).code(), Some("B"));
        assert_eq!(tx.register("u3", false), RegisterOutcome::NoStock);
    }

    #[test]
    fn test_already_registered_is_clean() {
        let mut f = Fixture::new();
        {
            let mut tx = f.tx();
            tx.add_registration_codes(["A", "B"]);
            tx.register("u1", false);
        }
        let mut tx = f.tx();
        tx.register("u1", false);
        assert!(!tx.is_dirty());
        assert_eq!(tx.state().registration_codes.available(), 1);
    }

    #[test]
    fn test_test_mode_register_keeps_stock() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["A"]);
        assert_eq!(tx.register("u1", true).code(), Some("TEST-REG-u1"));
        assert_eq!(tx.state().registration_codes.available(), 1);
        assert!(tx.state().contains_code("TEST-REG-u1"));
    }

    #[test]
    fn test_test_mode_placeholder_avoids_taken_codes() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["TEST-REG-u1"]);
        tx.add_lottery_codes(Tier::Blue, ["TEST-REG-u1-2"]);

        assert_eq!(tx.register("u1", true).code(), Some("TEST-REG-u1-3"));
        assert_eq!(tx.register("u2", false).code(), Some("TEST-REG-u1"));

        let pool = &tx.state().registration_codes;
        assert_eq!(pool.used_record("TEST-REG-u1").unwrap().consumer_id, "u2");
        assert_eq!(pool.used_record("TEST-REG-u1-3").unwrap().consumer_id, "u1");
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_test_mode_reregister_keeps_revoked_code_retired() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        assert_eq!(tx.register("u1", true).code(), Some("TEST-REG-u1"));
        assert!(tx.reset_user_registration("u1"));

        assert_eq!(tx.register("u1", true).code(), Some("TEST-REG-u1-2"));
        let pool = &tx.state().registration_codes;
        assert!(pool.used_record("TEST-REG-u1").unwrap().revoked);
        assert!(!pool.used_record("TEST-REG-u1-2").unwrap().revoked);
        assert_eq!(pool.issued(), 2);
    }

    #[test]
    fn test_blacklist_checked_first() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["A"]);
        tx.add_lottery_codes(Tier::Blue, ["B1"]);
        tx.add_to_blacklist("bad");

        assert_eq!(tx.register("bad", false), RegisterOutcome::Blacklisted);
        assert_eq!(
            tx.draw_lottery("bad", false),
            DrawOutcome::Rejected(DrawRejection::Blacklisted)
        );
        assert_eq!(
            tx.can_draw("bad"),
            DrawCheck::Denied(DrawRejection::Blacklisted)
        );
        assert!(!tx.state().user_lottery.contains_key("bad"));
        assert_eq!(tx.state().registration_codes.available(), 1);
    }

    #[test]
    fn test_add_codes_global_uniqueness() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        let report = tx.add_registration_codes(["X", " ", "Y", "X"]);
        assert_eq!(report, ImportReport { added: 2, skipped: 1 });

        let report = tx.add_lottery_codes(Tier::Gold, ["Y", "Z"]);
        assert_eq!(report, ImportReport { added: 1, skipped: 1 });

        tx.register("u1", false);
        let report = tx.add_event_codes(["X"]);
        assert_eq!(report, ImportReport { added: 0, skipped: 1 });
    }

    #[test]
    fn test_weekly_limit() {
        let mut f = Fixture::new();
        {
            let mut tx = f.tx();
            tx.add_lottery_codes(Tier::Blue, ["B1", "B2", "B3"]);
            assert!(tx.draw_lottery("u1", false).is_success());
            assert_eq!(
                tx.draw_lottery("u1", false),
                DrawOutcome::Rejected(DrawRejection::WeeklyLimitReached)
            );
            assert_eq!(
                tx.can_draw("u1"),
                DrawCheck::Denied(DrawRejection::WeeklyLimitReached)
            );
        }
        // Wednesday to next Monday
        f.clock.advance(Duration::days(5));
        let mut tx = f.tx();
        assert!(tx.can_draw("u1").is_allowed());
        assert!(tx.draw_lottery("u1", false).is_success());
    }

    #[test]
    fn test_daily_limit() {
        let mut f = Fixture::new();
        f.state.lottery_config.weekly_limit = 0;
        f.state.lottery_config.daily_limit = 2;
        {
            let mut tx = f.tx();
            tx.add_lottery_codes(Tier::Blue, ["B1", "B2", "B3"]);
            assert!(tx.draw_lottery("u1", false).is_success());
            assert!(tx.draw_lottery("u1", false).is_success());
            assert_eq!(
                tx.draw_lottery("u1", false),
                DrawOutcome::Rejected(DrawRejection::DailyLimitReached)
            );
        }
        f.clock.advance(Duration::days(1));
        assert!(f.tx().draw_lottery("u1", false).is_success());
    }

    #[test]
    fn test_pool_empty() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        assert_eq!(
            tx.draw_lottery("u1", false),
            DrawOutcome::Rejected(DrawRejection::PoolEmpty)
        );
        // the lazily created record is kept
        assert!(tx.state().user_lottery.contains_key("u1"));
    }

    #[test]
    fn test_pity_guarantee() {
        let mut f = Fixture::new();
        f.state.lottery_config.weekly_limit = 0;
        f.state.lottery_config.pity_threshold = 3;
        let mut tx = f.tx();
        tx.add_lottery_codes(Tier::Blue, ["B1", "B2", "B3", "B4"]);

        for _ in 0..3 {
            assert_eq!(tx.draw_lottery("u1", false).tier(), Some(Tier::Blue));
        }
        assert_eq!(tx.user_lottery_data("u1").pity_count, 3);

        assert_eq!(
            tx.draw_lottery("u1", false),
            DrawOutcome::Rejected(DrawRejection::PitySoldOut)
        );

        tx.add_lottery_codes(Tier::Purple, ["P1"]);
        assert_eq!(
            tx.draw_lottery("u1", false),
            DrawOutcome::Won {
                tier: Tier::Purple,
                code: "P1".into(),
                pity_triggered: true
            }
        );
        assert_eq!(tx.user_lottery_data("u1").pity_count, 0);
    }

    #[test]
    fn test_test_mode_draw() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_lottery_codes(Tier::Blue, ["B1"]);
        let outcome = tx.draw_lottery("u1", true);
        assert_eq!(outcome.code(), Some("TEST-BLUE-u1-120000"));
        assert_eq!(tx.state().lottery_pool.blue.available(), 1);
        assert_eq!(tx.user_lottery_data("u1").week_draws, 1);
        assert_eq!(tx.lottery_history(1)[0].code_hash, "TEST****");
        // test draws count toward the weekly limit
        assert_eq!(
            tx.draw_lottery("u1", true),
            DrawOutcome::Rejected(DrawRejection::WeeklyLimitReached)
        );
    }

    #[test]
    fn test_history_is_redacted() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_lottery_codes(Tier::Blue, ["BLUE-SECRET-1"]);
        tx.draw_lottery("u1", false);
        let entry = &tx.lottery_history(10)[0];
        assert_eq!(entry.code_hash, "BLUE****");
        assert_eq!(entry.consumer_id, "u1");
    }

    #[test]
    fn test_expired_event_is_switched_off() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_event_codes(["E1"]);
        tx.set_event_pool("Spring", "2024-03-05");
        tx.dirty = false;

        assert!(!tx.is_event_pool_active());
        assert!(tx.is_dirty());
        assert!(!tx.state().event_pool.enabled);

        // idempotent
        tx.dirty = false;
        assert!(!tx.is_event_pool_active());
        assert!(!tx.is_dirty());

        assert_eq!(
            tx.draw_lottery("u1", false),
            DrawOutcome::Rejected(DrawRejection::PoolEmpty)
        );
    }

    #[test]
    fn test_event_cards_drawn_while_active() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_event_codes(["E1"]);
        tx.set_event_pool("Spring", "2024-03-31");
        assert_eq!(tx.draw_lottery("u1", false).code(), Some("E1"));
        assert_eq!(tx.event_pool_info().stock, 0);
    }

    #[test]
    fn test_reset_registration_revokes() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["A", "B"]);
        tx.register("u1", false);
        assert!(tx.reset_user_registration("u1"));
        assert!(!tx.reset_user_registration("u1"));

        let record = tx.state().registration_codes.used_record("A").unwrap();
        assert!(record.revoked);
        // re-registering takes the next code, never A again
        assert_eq!(tx.register("u1", false).code(), Some("B"));
        assert_eq!(tx.add_registration_codes(["A"]).skipped, 1);
    }

    #[test]
    fn test_import_users() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["A"]);
        tx.register("u1", false);
        let report = tx.import_registered_users(["u1", "u2", "", "u2"]);
        assert_eq!(report, ImportReport { added: 1, skipped: 2 });

        let info = tx.user_info("u2").unwrap();
        assert!(info.imported);
        assert_eq!(info.reg_code, None);
        assert_eq!(
            tx.register("u2", false),
            RegisterOutcome::AlreadyRegistered { code: None }
        );
    }

    #[test]
    fn test_weekly_reset_logs() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_lottery_codes(Tier::Blue, ["B1"]);
        tx.draw_lottery("u1", false);
        assert_eq!(tx.weekly_reset(), 1);
        assert_eq!(tx.user_lottery_data("u1").week_draws, 0);
        assert_eq!(tx.user_lottery_data("u1").total_draws, 1);
        let log = &tx.logs(1)[0];
        assert_eq!(log.action, "weekly_reset");
        assert_eq!(log.actor_id, SYSTEM_ACTOR);
    }

    #[test]
    fn test_log_truncates() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.log_action("add_codes", "admin", "GOLD-0001-0002-0003-0004");
        assert_eq!(tx.logs(1)[0].detail, "GOLD-0001-0002-...");
    }

    #[test]
    fn test_reset_lottery_and_statistics() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_registration_codes(["R1", "R2"]);
        tx.add_lottery_codes(Tier::Blue, ["B1", "B2"]);
        tx.register("u1", false);
        tx.draw_lottery("u1", false);
        tx.add_to_blacklist("bad");

        let stats = tx.statistics();
        assert_eq!(stats.registered_users, 1);
        assert_eq!(stats.registration_unused, 1);
        assert_eq!(stats.registration_used, 1);
        assert_eq!(stats.tier_stock.get(Tier::Blue), 1);
        assert_eq!(stats.tier_draws.get(Tier::Blue), 1);
        assert_eq!(stats.blacklist_count, 1);
        assert_eq!(stats.total_draws, 1);

        assert!(tx.reset_user_lottery("u1"));
        assert!(!tx.reset_user_lottery("nobody"));
        assert_eq!(tx.user_lottery_data("u1"), UserLotteryRecord::default());
    }

    #[test]
    fn test_config_update() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        assert!(!tx.update_lottery_config(ConfigChange::PityThreshold(0)));
        assert!(!tx.is_dirty());
        assert!(tx.update_lottery_config(ConfigChange::PityTier(Tier::Gold)));
        assert_eq!(tx.lottery_config().pity_tier, Tier::Gold);
    }

    #[test]
    fn test_announcement_and_blacklist() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.set_announcement("maintenance tonight");
        assert_eq!(tx.announcement().content, "maintenance tonight");
        assert!(tx.announcement().time.is_some());
        tx.clear_announcement();
        assert_eq!(tx.announcement(), Announcement::default());

        assert!(tx.add_to_blacklist("a"));
        assert!(!tx.add_to_blacklist("a"));
        tx.add_to_blacklist("b");
        assert!(tx.remove_from_blacklist("b"));
        assert_eq!(tx.blacklist(), vec!["a".to_string()]);
        assert_eq!(tx.clear_blacklist(), 1);
        assert!(!tx.is_blacklisted("a"));
    }

    #[test]
    fn test_codes_preview() {
        let mut f = Fixture::new();
        let mut tx = f.tx();
        tx.add_lottery_codes(Tier::Gold, ["GOLDCODE-001", "SHORT"]);
        assert_eq!(
            tx.codes_preview(PoolId::Tier(Tier::Gold), 10),
            vec!["GOLD****01".to_string(), "SH****".to_string()]
        );
        assert!(tx.codes_preview(PoolId::Registration, 10).is_empty());
    }
}
