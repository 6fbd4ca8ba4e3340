//! # The Store
//!
//! One process-wide lock around the whole aggregate. Every public method
//! takes the lock, runs one [`Transaction`], persists if anything changed,
//! and releases the lock. No partial operation is ever visible to another
//! caller.
//!
//! ## Durability
//!
//! A failed persist is returned as an error. The in-memory change is kept
//! (the lock has already let it through) and marked unflushed; the next
//! successful write, an explicit [`Store::flush`], or dropping the store
//! retries it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::ledger::{AuditLogEntry, LotteryHistoryEntry};
use crate::migration::{migrate, MigrationReport, RawDocument};
use crate::outcome::{
    DrawCheck, DrawOutcome, EventPoolInfo, ImportReport, RegisterOutcome, StoreStatistics,
    UserEntry,
};
use crate::persistence::{AtomicFile, LoadSource};
use crate::state::{
    Announcement, ConfigChange, LotteryConfig, PoolId, RegisteredUser, StoreState,
    UserLotteryRecord,
};
use crate::tier::{Tier, TierCounts};
use crate::transaction::Transaction;

/// Default data file name.
pub const DEFAULT_FILE_NAME: &str = "data.json";

/// How to open a [`Store`].
#[derive(Clone)]
pub struct StoreOptions {
    dir: PathBuf,
    file_name: String,
    seed: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("dir", &self.dir)
            .field("file_name", &self.file_name)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl StoreOptions {
    /// Stores `data.json` in `dir`, with OS entropy and the system clock.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            seed: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Overrides the data file name.
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Seeds tier selection for reproducible runs.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Loads (or initializes) the store.
    ///
    /// # Errors
    ///
    /// Fails only if the data directory cannot be created, or if a
    /// document that needed migration cannot be written back. Unreadable
    /// data never fails the open.
    pub fn open(self) -> StoreResult<Store> {
        Store::open(self)
    }
}

struct StoreInner {
    state: StoreState,
    rng: ChaCha20Rng,
    unflushed: bool,
}

/// The code inventory and lottery store.
pub struct Store {
    inner: Mutex<StoreInner>,
    file: AtomicFile,
    clock: Arc<dyn Clock>,
    load_source: LoadSource,
    migration: MigrationReport,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.file.path())
            .field("load_source", &self.load_source)
            .finish_non_exhaustive()
    }
}

fn decode_document(path: &Path, bytes: &[u8]) -> StoreResult<RawDocument> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

impl Store {
    /// Opens a store with default options in `dir`.
    ///
    /// # Errors
    ///
    /// See [`StoreOptions::open`].
    pub fn open_in(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        StoreOptions::new(dir).open()
    }

    fn open(options: StoreOptions) -> StoreResult<Self> {
        std::fs::create_dir_all(&options.dir)
            .map_err(|e| StoreError::io("create data dir", options.dir.clone(), e))?;

        let file = AtomicFile::new(options.dir.join(&options.file_name));
        file.sweep_stale_temps();

        let recovered = file.load_with(decode_document);
        let (state, migration) = migrate(recovered.value.unwrap_or_default(), options.clock.now());

        let rng = match options.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };

        let store = Self {
            inner: Mutex::new(StoreInner {
                state,
                rng,
                unflushed: false,
            }),
            file,
            clock: options.clock,
            load_source: recovered.source,
            migration,
        };

        if !store.migration.is_clean() {
            tracing::info!(report = ?store.migration, "Writing back migrated document");
            store.flush()?;
        }

        tracing::info!(
            path = %store.file.path().display(),
            source = ?store.load_source,
            "Store opened"
        );
        Ok(store)
    }

    /// Runs `f` in one critical section and persists once if it changed anything.
    ///
    /// The store lock is not reentrant. Inside `f`, use the methods on the
    /// [`Transaction`]; calling any `Store` method from the closure deadlocks.
    ///
    /// # Errors
    ///
    /// Returns the persist error if the changed state could not be written.
    /// The change itself stays applied in memory.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> T) -> StoreResult<T> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut tx = Transaction::new(&mut inner.state, &mut inner.rng, self.clock.as_ref());
        let value = f(&mut tx);
        let dirty = tx.is_dirty();

        if dirty || inner.unflushed {
            inner.unflushed = true;
            self.persist(&inner.state)?;
            inner.unflushed = false;
        }
        Ok(value)
    }

    /// Runs a read-only closure under the lock.
    ///
    /// Same rule as [`Store::transaction`]: the closure must not call back
    /// into the `Store`.
    pub fn inspect<T>(&self, f: impl FnOnce(&Transaction<'_>) -> T) -> T {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let tx = Transaction::new(&mut inner.state, &mut inner.rng, self.clock.as_ref());
        f(&tx)
    }

    /// Writes the current state unconditionally.
    ///
    /// # Errors
    ///
    /// Returns the persist error; the state stays marked unflushed.
    pub fn flush(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.unflushed = true;
        self.persist(&inner.state)?;
        inner.unflushed = false;
        Ok(())
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.file.write(&bytes).map_err(|e| {
            tracing::error!(path = %self.file.path().display(), error = %e, "Persist failed");
            e
        })
    }

    /// Deep copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.inner.lock().state.clone()
    }

    /// Primary data file.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        self.file.path()
    }

    /// Backup data file.
    #[must_use]
    pub fn backup_path(&self) -> &Path {
        self.file.backup_path()
    }

    /// Which file the state was loaded from.
    #[must_use]
    pub fn load_source(&self) -> LoadSource {
        self.load_source
    }

    /// Corrections applied while loading.
    #[must_use]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// The store's time source.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // =========================================================================
    // Single-operation wrappers
    // =========================================================================

    /// See [`Transaction::register`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn register(&self, user_id: &str, test_mode: bool) -> StoreResult<RegisterOutcome> {
        self.transaction(|tx| tx.register(user_id, test_mode))
    }

    /// See [`Transaction::draw_lottery`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn draw_lottery(&self, user_id: &str, test_mode: bool) -> StoreResult<DrawOutcome> {
        self.transaction(|tx| tx.draw_lottery(user_id, test_mode))
    }

    /// See [`Transaction::can_draw`].
    #[must_use]
    pub fn can_draw(&self, user_id: &str) -> DrawCheck {
        self.inspect(|tx| tx.can_draw(user_id))
    }

    /// See [`Transaction::add_registration_codes`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn add_registration_codes<I, S>(&self, codes: I) -> StoreResult<ImportReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transaction(|tx| tx.add_registration_codes(codes))
    }

    /// See [`Transaction::add_lottery_codes`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn add_lottery_codes<I, S>(&self, tier: Tier, codes: I) -> StoreResult<ImportReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transaction(|tx| tx.add_lottery_codes(tier, codes))
    }

    /// See [`Transaction::add_event_codes`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn add_event_codes<I, S>(&self, codes: I) -> StoreResult<ImportReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transaction(|tx| tx.add_event_codes(codes))
    }

    /// See [`Transaction::import_registered_users`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn import_registered_users<I, S>(&self, user_ids: I) -> StoreResult<ImportReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transaction(|tx| tx.import_registered_users(user_ids))
    }

    /// See [`Transaction::reset_user_registration`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn reset_user_registration(&self, user_id: &str) -> StoreResult<bool> {
        self.transaction(|tx| tx.reset_user_registration(user_id))
    }

    /// See [`Transaction::reset_user_lottery`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn reset_user_lottery(&self, user_id: &str) -> StoreResult<bool> {
        self.transaction(|tx| tx.reset_user_lottery(user_id))
    }

    /// See [`Transaction::weekly_reset`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn weekly_reset(&self) -> StoreResult<usize> {
        self.transaction(|tx| tx.weekly_reset())
    }

    /// See [`Transaction::update_lottery_config`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn update_lottery_config(&self, change: ConfigChange) -> StoreResult<bool> {
        self.transaction(|tx| tx.update_lottery_config(change))
    }

    /// See [`Transaction::set_event_pool`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn set_event_pool(&self, name: &str, end_time: &str) -> StoreResult<()> {
        self.transaction(|tx| tx.set_event_pool(name, end_time))
    }

    /// See [`Transaction::disable_event_pool`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn disable_event_pool(&self) -> StoreResult<()> {
        self.transaction(|tx| tx.disable_event_pool())
    }

    /// See [`Transaction::is_event_pool_active`].
    ///
    /// # Errors
    ///
    /// Persist failure of the correcting write when the event has lapsed.
    pub fn is_event_pool_active(&self) -> StoreResult<bool> {
        self.transaction(|tx| tx.is_event_pool_active())
    }

    /// See [`Transaction::add_to_blacklist`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn add_to_blacklist(&self, user_id: &str) -> StoreResult<bool> {
        self.transaction(|tx| tx.add_to_blacklist(user_id))
    }

    /// See [`Transaction::remove_from_blacklist`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn remove_from_blacklist(&self, user_id: &str) -> StoreResult<bool> {
        self.transaction(|tx| tx.remove_from_blacklist(user_id))
    }

    /// See [`Transaction::clear_blacklist`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn clear_blacklist(&self) -> StoreResult<usize> {
        self.transaction(|tx| tx.clear_blacklist())
    }

    /// See [`Transaction::set_announcement`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn set_announcement(&self, content: &str) -> StoreResult<()> {
        self.transaction(|tx| tx.set_announcement(content))
    }

    /// See [`Transaction::clear_announcement`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn clear_announcement(&self) -> StoreResult<()> {
        self.transaction(|tx| tx.clear_announcement())
    }

    /// See [`Transaction::log_action`].
    ///
    /// # Errors
    ///
    /// Persist failure.
    pub fn log_action(&self, action: &str, actor_id: &str, detail: &str) -> StoreResult<()> {
        self.transaction(|tx| tx.log_action(action, actor_id, detail))
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Returns true if the user holds a registration.
    #[must_use]
    pub fn is_registered(&self, user_id: &str) -> bool {
        self.inspect(|tx| tx.is_registered(user_id))
    }

    /// Registration record of a user.
    #[must_use]
    pub fn user_info(&self, user_id: &str) -> Option<RegisteredUser> {
        self.inspect(|tx| tx.user_info(user_id))
    }

    /// Draw counters of a user.
    #[must_use]
    pub fn user_lottery_data(&self, user_id: &str) -> UserLotteryRecord {
        self.inspect(|tx| tx.user_lottery_data(user_id))
    }

    /// Unissued stock per tier.
    #[must_use]
    pub fn pool_counts(&self) -> TierCounts {
        self.inspect(|tx| tx.pool_counts())
    }

    /// Current lottery config.
    #[must_use]
    pub fn lottery_config(&self) -> LotteryConfig {
        self.inspect(|tx| tx.lottery_config())
    }

    /// Newest draw history entries.
    #[must_use]
    pub fn lottery_history(&self, limit: usize) -> Vec<LotteryHistoryEntry> {
        self.inspect(|tx| tx.lottery_history(limit))
    }

    /// Newest audit entries.
    #[must_use]
    pub fn logs(&self, limit: usize) -> Vec<AuditLogEntry> {
        self.inspect(|tx| tx.logs(limit))
    }

    /// Event pool summary.
    #[must_use]
    pub fn event_pool_info(&self) -> EventPoolInfo {
        self.inspect(|tx| tx.event_pool_info())
    }

    /// Returns true if the user is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, user_id: &str) -> bool {
        self.inspect(|tx| tx.is_blacklisted(user_id))
    }

    /// Blacklisted users.
    #[must_use]
    pub fn blacklist(&self) -> Vec<String> {
        self.inspect(|tx| tx.blacklist())
    }

    /// Current announcement.
    #[must_use]
    pub fn announcement(&self) -> Announcement {
        self.inspect(|tx| tx.announcement())
    }

    /// Number of registered users.
    #[must_use]
    pub fn registered_user_count(&self) -> usize {
        self.inspect(|tx| tx.registered_user_count())
    }

    /// Up to `limit` registered users.
    #[must_use]
    pub fn registered_users(&self, limit: usize) -> Vec<UserEntry> {
        self.inspect(|tx| tx.registered_users(limit))
    }

    /// Every registered user.
    #[must_use]
    pub fn all_registered_users(&self) -> Vec<UserEntry> {
        self.inspect(|tx| tx.all_registered_users())
    }

    /// Masked view of the next codes in a pool.
    #[must_use]
    pub fn codes_preview(&self, pool: PoolId, limit: usize) -> Vec<String> {
        self.inspect(|tx| tx.codes_preview(pool, limit))
    }

    /// Dashboard figures.
    #[must_use]
    pub fn statistics(&self) -> StoreStatistics {
        self.inspect(|tx| tx.statistics())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        if inner.unflushed {
            if let Err(e) = self.persist(&inner.state) {
                tracing::error!(error = %e, "Unflushed changes lost at shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("tiervault_store_{tag}_{nanos}"))
    }

    #[test]
    fn test_open_fresh_writes_nothing() {
        let dir = test_dir("fresh");
        let store = StoreOptions::new(&dir).with_seed(1).open().unwrap();
        assert_eq!(store.load_source(), LoadSource::Fresh);
        assert!(!store.data_path().exists());
        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mutation_persists_and_reloads() {
        let dir = test_dir("reload");
        {
            let store = StoreOptions::new(&dir).with_seed(1).open().unwrap();
            store.add_registration_codes(["A", "B"]).unwrap();
            store.register("u1", false).unwrap();
        }
        let store = StoreOptions::new(&dir).with_seed(1).open().unwrap();
        assert_eq!(store.load_source(), LoadSource::Primary);
        assert_eq!(store.user_info("u1").unwrap().reg_code.as_deref(), Some("A"));
        assert_eq!(store.snapshot().registration_codes.available(), 1);
        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_only_ops_do_not_write() {
        let dir = test_dir("readonly");
        let store = StoreOptions::new(&dir).with_seed(1).open().unwrap();
        let _ = store.statistics();
        let _ = store.can_draw("u1");
        assert!(!store.register("u1", false).unwrap().is_success());
        assert!(!store.data_path().exists());
        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_composite_transaction() {
        let dir = test_dir("composite");
        let store = StoreOptions::new(&dir).with_seed(1).open().unwrap();
        store.add_registration_codes(["A"]).unwrap();
        let outcome = store
            .transaction(|tx| {
                let outcome = tx.register("u1", false);
                if outcome.is_success() {
                    tx.log_action("register", "u1", "code issued");
                }
                outcome
            })
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(store.logs(5).len(), 1);
        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }
}
