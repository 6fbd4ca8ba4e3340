//! # TIERVAULT Store
//!
//! Transactional inventory of one-time codes with a weighted lottery.
//!
//! ## Design Principles
//!
//! 1. **Never issue a code twice** - one global code namespace; issued codes are retired forever
//! 2. **One lock, whole operations** - check, choose, consume and record happen in one critical section
//! 3. **Survive crashes** - atomic replace on every write, `.bak` recovery on load
//! 4. **Rejections are values** - only durability failures are errors
//!
//! ## Thread Safety
//!
//! [`Store`] is `Send + Sync`. Share it behind an `Arc`; every method
//! serializes on the internal lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiervault_store::{Store, Tier};
//!
//! let store = Store::open_in("data")?;
//! store.add_lottery_codes(Tier::Blue, ["BLUE-0001", "BLUE-0002"])?;
//!
//! let outcome = store.draw_lottery("10001", false)?;
//! println!("{}", outcome.reason());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocation;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod outcome;
pub mod persistence;
pub mod pool;
pub mod state;
pub mod store;
pub mod tier;
pub mod timestamp;
pub mod transaction;

pub use allocation::{pity_chain, AllocationEngine, TierDecision};
pub use clock::{week_start, Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use ledger::{AuditLogEntry, LotteryHistoryEntry, AUDIT_CAPACITY, HISTORY_CAPACITY};
pub use migration::MigrationReport;
pub use outcome::{
    DrawCheck, DrawOutcome, DrawRejection, EventPoolInfo, ImportReport, RegisterOutcome,
    StoreStatistics, UserEntry,
};
pub use persistence::{AtomicFile, LoadSource, Recovered};
pub use pool::{mask_preview, CodePool, UsedRecord};
pub use state::{
    Announcement, ConfigChange, EventPool, EventStatus, LotteryConfig, PoolId, RegisteredUser,
    StoreState, UserLotteryRecord,
};
pub use store::{Store, StoreOptions, DEFAULT_FILE_NAME};
pub use tier::{Tier, TierCounts};
pub use transaction::{Transaction, SYSTEM_ACTOR};
