//! Loot box odds
//!
//! Every box type owns a cumulative probability table over the reward tiers,
//! walked rarest first. A uniform draw in `[0, 1)` picks the first tier whose
//! upper bound exceeds it, so `GOD` at `0.0001` means draws in
//! `[0, 0.0001)` yield `GOD`.
//!
//! This table is the only place the odds are written down. The resolver and
//! any preview shown to users both read from it.

use crate::errors::{Error, Result};
use crate::models::{BoxType, RewardTier};

/// Cumulative upper bounds, rows by `BoxType::index`, columns by `RewardTier::index`
type Bands = [[f64; 6]; 3];

const DEFAULT_BANDS: Bands = [
    // standard
    [0.0001, 0.005, 0.05, 0.2, 0.5, 1.0],
    // premium
    [0.0005, 0.01, 0.08, 0.25, 0.55, 1.0],
    // ultra
    [0.001, 0.02, 0.12, 0.32, 0.6, 1.0],
];

/// Odds for every box type
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    bands: Bands,
}

impl TierTable {
    /// The production odds
    pub fn standard() -> Self {
        Self { bands: DEFAULT_BANDS }
    }

    /// Build a custom table from cumulative upper bounds.
    ///
    /// Each row must be strictly increasing, start above zero and end at
    /// exactly 1.0 so that every draw maps to one tier.
    pub fn new(bands: Bands) -> Result<Self> {
        for box_type in BoxType::ALL {
            let row = &bands[box_type.index()];
            let mut previous = 0.0;
            for (tier, &upper) in RewardTier::ALL.iter().zip(row.iter()) {
                // Written this way so NaN bounds fail too
                if !(upper > previous) {
                    return Err(Error::InvalidData(format!(
                        "{} odds: {} bound {} is not above {}",
                        box_type, tier, upper, previous
                    )));
                }
                previous = upper;
            }
            if previous != 1.0 {
                return Err(Error::InvalidData(format!(
                    "{} odds end at {} instead of 1.0",
                    box_type, previous
                )));
            }
        }
        Ok(Self { bands })
    }

    /// Half-open band `[lower, upper)` of a tier
    pub fn band(&self, box_type: BoxType, tier: RewardTier) -> (f64, f64) {
        let row = &self.bands[box_type.index()];
        let i = tier.index();
        let lower = if i == 0 { 0.0 } else { row[i - 1] };
        (lower, row[i])
    }

    /// Probability mass of a tier for a box type
    pub fn probability(&self, box_type: BoxType, tier: RewardTier) -> f64 {
        let (lower, upper) = self.band(box_type, tier);
        upper - lower
    }

    /// Per-tier probabilities in rarity order, for display
    pub fn odds(&self, box_type: BoxType) -> Vec<(RewardTier, f64)> {
        RewardTier::ALL
            .iter()
            .map(|&tier| (tier, self.probability(box_type, tier)))
            .collect()
    }

    /// Map a draw to its tier.
    ///
    /// Total over every `f64`: negative draws land in the rarest band,
    /// draws at or above 1.0 (and NaN) land in `COMMON`.
    pub fn tier_for_draw(&self, box_type: BoxType, draw: f64) -> RewardTier {
        let row = &self.bands[box_type.index()];
        RewardTier::ALL
            .iter()
            .zip(row.iter())
            .find(|&(_, &upper)| draw < upper)
            .map(|(&tier, _)| tier)
            .unwrap_or(RewardTier::Common)
    }

    /// Draw once from `rng` and resolve the tier
    pub fn resolve_reward<F>(&self, box_type: BoxType, rng: F) -> RewardTier
    where
        F: FnOnce() -> f64,
    {
        self.tier_for_draw(box_type, rng())
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::standard()
    }
}
