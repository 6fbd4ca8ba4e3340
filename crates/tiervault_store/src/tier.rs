//! # Reward Tiers
//!
//! The four reward classes and a fixed-size per-tier counter.
//!
//! The declaration order `Gold, Purple, Blue, Event` is the enumeration
//! order used everywhere a sum is taken over tiers, including the
//! cumulative-weight walk in the allocation engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Reward tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Tier {
    /// Top regular tier.
    Gold = 0,
    /// Middle regular tier, the default pity guarantee.
    Purple = 1,
    /// Lowest tier. Drawing it advances the pity counter.
    Blue = 2,
    /// Limited-time event cards.
    Event = 3,
}

impl Tier {
    /// All tiers in enumeration order.
    pub const ALL: [Self; 4] = [Self::Gold, Self::Purple, Self::Blue, Self::Event];

    /// The three always-on lottery tiers.
    pub const REGULAR: [Self; 3] = [Self::Gold, Self::Purple, Self::Blue];

    /// Lowercase name used on disk and in reason strings.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Purple => "purple",
            Self::Blue => "blue",
            Self::Event => "event",
        }
    }

    /// Returns true for the lowest tier.
    #[inline]
    #[must_use]
    pub const fn is_lowest(self) -> bool {
        matches!(self, Self::Blue)
    }

    /// Index into per-tier arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" => Ok(Self::Gold),
            "purple" => Ok(Self::Purple),
            "blue" => Ok(Self::Blue),
            "event" => Ok(Self::Event),
            _ => Err(StoreError::UnknownTier(s.to_string())),
        }
    }
}

/// One counter per tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    counts: [u64; 4],
}

impl TierCounts {
    /// All counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { counts: [0; 4] }
    }

    /// Builds counts from `(gold, purple, blue, event)`.
    #[must_use]
    pub const fn from_parts(gold: u64, purple: u64, blue: u64, event: u64) -> Self {
        Self {
            counts: [gold, purple, blue, event],
        }
    }

    /// Count for a tier.
    #[inline]
    #[must_use]
    pub const fn get(&self, tier: Tier) -> u64 {
        self.counts[tier.index()]
    }

    /// Overwrites the count for a tier.
    #[inline]
    pub fn set(&mut self, tier: Tier, value: u64) {
        self.counts[tier.index()] = value;
    }

    /// Adds one to a tier.
    #[inline]
    pub fn increment(&mut self, tier: Tier) {
        let slot = &mut self.counts[tier.index()];
        *slot = slot.saturating_add(1);
    }

    /// Sum over all tiers.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// `(tier, count)` pairs in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, u64)> + '_ {
        Tier::ALL.iter().map(move |&t| (t, self.get(t)))
    }
}
