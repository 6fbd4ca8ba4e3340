//! # Allocation Engine
//!
//! **Weighted tier selection with a pity guarantee**
//!
//! Pure decision logic. The engine reads stock counts and the user's pity
//! counter and returns a [`TierDecision`]; it never touches a pool. The
//! transaction layer calls it while holding the store lock.
//!
//! ## Weighted Pick
//!
//! Only tiers with stock take part. With weights `w_t` (each clamped to at
//! least 1) and `total = Σ w_t`, draw `r` uniformly from `[1, total]` and
//! walk the tiers in declaration order (gold, purple, blue, event) until
//! the running sum reaches `r`:
//!
//! ```text
//! weights  gold=5  purple=20  blue=75
//! r        1..=5   6..=25     26..=100
//! ```
//!
//! ## Pity
//!
//! When `pity_count >= pity_threshold` the weighted pick is skipped and the
//! first tier with stock in the fallback chain wins:
//!
//! | `pity_tier` | chain |
//! |-------------|-------|
//! | purple | purple, gold, event |
//! | gold | gold, event |
//! | other `t` | t, gold, event |
//!
//! Blue is never reached through the purple or gold chains.

use rand::Rng;

use crate::state::LotteryConfig;
use crate::tier::{Tier, TierCounts};

/// What the engine decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierDecision {
    /// Regular weighted pick.
    Weighted(Tier),
    /// Pity guarantee fired and found stock.
    Pity(Tier),
    /// Pity guarantee fired but every tier in the chain is out of stock.
    PitySoldOut,
    /// No stock in any tier.
    Empty,
}

impl TierDecision {
    /// The chosen tier, if any.
    #[inline]
    #[must_use]
    pub const fn tier(self) -> Option<Tier> {
        match self {
            Self::Weighted(t) | Self::Pity(t) => Some(t),
            Self::PitySoldOut | Self::Empty => None,
        }
    }
}

/// Fallback chain for a pity tier.
#[must_use]
pub fn pity_chain(pity_tier: Tier) -> Vec<Tier> {
    match pity_tier {
        Tier::Purple => vec![Tier::Purple, Tier::Gold, Tier::Event],
        Tier::Gold => vec![Tier::Gold, Tier::Event],
        other => vec![other, Tier::Gold, Tier::Event],
    }
}

/// Stateless tier selection over a config.
#[derive(Clone, Copy, Debug)]
pub struct AllocationEngine<'a> {
    config: &'a LotteryConfig,
}

impl<'a> AllocationEngine<'a> {
    /// Creates an engine for `config`.
    #[inline]
    #[must_use]
    pub const fn new(config: &'a LotteryConfig) -> Self {
        Self { config }
    }

    /// Sum of the weights of tiers with stock.
    #[must_use]
    pub fn total_weight(&self, stock: &TierCounts) -> u64 {
        stock
            .iter()
            .filter(|&(_, n)| n > 0)
            .map(|(t, _)| self.config.weight(t))
            .sum()
    }

    /// The tier selected by roll `r`, for `r` in `[1, total_weight]`.
    ///
    /// Returns `None` when no tier has stock. Rolls past the total land on
    /// the last stocked tier.
    #[must_use]
    pub fn weighted_pick(&self, stock: &TierCounts, r: u64) -> Option<Tier> {
        let mut cumulative = 0u64;
        let mut last = None;
        for (tier, n) in stock.iter() {
            if n == 0 {
                continue;
            }
            cumulative += self.config.weight(tier);
            if r <= cumulative {
                return Some(tier);
            }
            last = Some(tier);
        }
        last
    }

    /// First tier of the pity chain with stock.
    #[must_use]
    pub fn pity_pick(&self, stock: &TierCounts) -> Option<Tier> {
        pity_chain(self.config.pity_tier)
            .into_iter()
            .find(|&t| stock.get(t) > 0)
    }

    /// Decides the tier for one draw.
    pub fn decide<R: Rng>(
        &self,
        stock: &TierCounts,
        pity_count: u32,
        rng: &mut R,
    ) -> TierDecision {
        if stock.total() == 0 {
            return TierDecision::Empty;
        }
        if pity_count >= self.config.pity_threshold {
            return self
                .pity_pick(stock)
                .map_or(TierDecision::PitySoldOut, TierDecision::Pity);
        }
        let total = self.total_weight(stock);
        let r = rng.gen_range(1..=total);
        self.weighted_pick(stock, r)
            .map_or(TierDecision::Empty, TierDecision::Weighted)
    }

    /// Selection probability of each tier for the given stock.
    #[must_use]
    pub fn odds(&self, stock: &TierCounts) -> Vec<(Tier, f64)> {
        let total = self.total_weight(stock);
        if total == 0 {
            return Vec::new();
        }
        stock
            .iter()
            .filter(|&(_, n)| n > 0)
            .map(|(t, _)| (t, self.config.weight(t) as f64 / total as f64))
            .collect()
    }

    /// Runs `iterations` weighted picks against fixed stock and counts outcomes.
    ///
    /// Stock is not consumed, so this measures the raw weight distribution.
    pub fn run_statistics<R: Rng>(
        &self,
        stock: &TierCounts,
        iterations: u64,
        rng: &mut R,
    ) -> TierCounts {
        let mut counts = TierCounts::new();
        let total = self.total_weight(stock);
        if total == 0 {
            return counts;
        }
        for _ in 0..iterations {
            let r = rng.gen_range(1..=total);
            if let Some(tier) = self.weighted_pick(stock, r) {
                counts.increment(tier);
            }
        }
        counts
    }
}
