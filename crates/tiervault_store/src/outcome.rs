//! # Operation Outcomes
//!
//! Business results of store operations. A rejection is a value with a
//! stable reason code, never an error.

use chrono::NaiveDateTime;

use crate::state::RegisteredUser;
use crate::tier::{Tier, TierCounts};

/// Result of [`Transaction::register`](crate::Transaction::register).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A code was issued.
    Registered {
        /// The issued code.
        code: String,
    },
    /// The user already holds a registration. Nothing changed.
    AlreadyRegistered {
        /// The code issued earlier; `None` for imported users.
        code: Option<String>,
    },
    /// No registration codes left.
    NoStock,
    /// The user is blacklisted.
    Blacklisted,
}

impl RegisterOutcome {
    /// Stable reason code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "success",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::NoStock => "no_stock",
            Self::Blacklisted => "blacklisted",
        }
    }

    /// Returns true only if a new code was issued.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }

    /// The code the user holds after the call, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Registered { code } => Some(code),
            Self::AlreadyRegistered { code } => code.as_deref(),
            Self::NoStock | Self::Blacklisted => None,
        }
    }
}

/// Why a draw was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawRejection {
    /// The user is blacklisted.
    Blacklisted,
    /// Weekly limit met.
    WeeklyLimitReached,
    /// Daily limit met.
    DailyLimitReached,
    /// No tier has stock.
    PoolEmpty,
    /// Pity fired but every tier in its chain is sold out.
    PitySoldOut,
}

impl DrawRejection {
    /// Stable reason code.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Blacklisted => "blacklisted",
            Self::WeeklyLimitReached => "weekly limit reached",
            Self::DailyLimitReached => "daily limit reached",
            Self::PoolEmpty => "pool empty",
            Self::PitySoldOut => "pity triggered but higher tiers sold out",
        }
    }
}

impl std::fmt::Display for DrawRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Result of [`Transaction::draw_lottery`](crate::Transaction::draw_lottery).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    /// A code was issued.
    Won {
        /// Tier drawn.
        tier: Tier,
        /// The issued code (a placeholder in test mode).
        code: String,
        /// The pity guarantee decided the tier.
        pity_triggered: bool,
    },
    /// Nothing was issued.
    Rejected(DrawRejection),
}

impl DrawOutcome {
    /// Stable reason code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Won { .. } => "success",
            Self::Rejected(r) => r.reason(),
        }
    }

    /// Returns true if a code was issued.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Won { .. })
    }

    /// Tier drawn, if any.
    #[must_use]
    pub const fn tier(&self) -> Option<Tier> {
        match self {
            Self::Won { tier, .. } => Some(*tier),
            Self::Rejected(_) => None,
        }
    }

    /// Code issued, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Won { code, .. } => Some(code),
            Self::Rejected(_) => None,
        }
    }
}

/// Read-only answer to "may this user draw now".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawCheck {
    /// Limits allow a draw. Stock is not checked.
    Allowed,
    /// Limits or the blacklist forbid it.
    Denied(DrawRejection),
}

impl DrawCheck {
    /// Returns true if a draw would pass the limit checks.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Reason code; empty when allowed.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Allowed => "",
            Self::Denied(r) => r.reason(),
        }
    }
}

/// Counts from a bulk import.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entries accepted.
    pub added: usize,
    /// Entries refused as duplicates.
    pub skipped: usize,
}

/// Event pool summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventPoolInfo {
    /// Enabled flag as stored.
    pub enabled: bool,
    /// Display name.
    pub name: String,
    /// Raw end time; empty for none.
    pub end_time: String,
    /// Unissued cards.
    pub stock: usize,
}

/// Aggregate figures for admin dashboards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Registered users, imported ones included.
    pub registered_users: usize,
    /// Unissued registration codes.
    pub registration_unused: usize,
    /// Issued registration codes, revoked ones included.
    pub registration_used: usize,
    /// Unissued stock per tier; event counts only while enabled.
    pub tier_stock: TierCounts,
    /// Tiers drawn, counted over the retained history.
    pub tier_draws: TierCounts,
    /// Blacklisted users.
    pub blacklist_count: usize,
    /// Lifetime draws over all users.
    pub total_draws: u64,
}

/// A registered user with their id, for listings and export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserEntry {
    /// User id.
    pub user_id: String,
    /// Registration record.
    pub record: RegisteredUser,
}

impl UserEntry {
    /// Registration time.
    #[must_use]
    pub fn reg_time(&self) -> NaiveDateTime {
        self.record.reg_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_reasons() {
        let ok = RegisterOutcome::Registered { code: "A".into() };
        assert!(ok.is_success());
        assert_eq!(ok.reason(), "success");
        assert_eq!(ok.code(), Some("A"));

        let again = RegisterOutcome::AlreadyRegistered {
            code: Some("A".into()),
        };
        assert!(!again.is_success());
        assert_eq!(again.reason(), "already_registered");
        assert_eq!(again.code(), Some("A"));

        assert_eq!(RegisterOutcome::NoStock.reason(), "no_stock");
        assert_eq!(RegisterOutcome::Blacklisted.code(), None);
    }

    #[test]
    fn test_draw_reasons() {
        let won = DrawOutcome::Won {
            tier: Tier::Gold,
            code: "G".into(),
            pity_triggered: false,
        };
        assert_eq!(won.reason(), "success");
        assert_eq!(won.tier(), Some(Tier::Gold));

        let cases = [
            (DrawRejection::WeeklyLimitReached, "weekly limit reached"),
            (DrawRejection::DailyLimitReached, "daily limit reached"),
            (DrawRejection::PoolEmpty, "pool empty"),
            (
                DrawRejection::PitySoldOut,
                "pity triggered but higher tiers sold out",
            ),
        ];
        for (rejection, reason) in cases {
            assert_eq!(DrawOutcome::Rejected(rejection).reason(), reason);
            assert_eq!(DrawCheck::Denied(rejection).reason(), reason);
        }
        assert_eq!(DrawCheck::Allowed.reason(), "");
    }
}
