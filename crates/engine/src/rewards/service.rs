//! Box opening, odds preview and collected names

use super::{DrawSource, UserLocks};
use chrono::Utc;
use otakudex_core::{
    Acquisition, BoxType, CatalogEntry, Error, Result, RewardResult, RewardTier, TierTable,
};
use otakudex_persistence::{sqlite, Database};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Opens loot boxes against the local ledger.
///
/// The tier comes from the shared [`TierTable`]; the name is drawn uniformly
/// from that tier's catalog pool. Openings for one user are serialised by
/// [`UserLocks`] on top of the conditional decrement in storage.
pub struct RewardService {
    db: Arc<Database>,
    tiers: Arc<TierTable>,
    draws: Arc<dyn DrawSource>,
    locks: Arc<UserLocks>,
}

impl RewardService {
    pub fn new(
        db: Arc<Database>,
        tiers: Arc<TierTable>,
        draws: Arc<dyn DrawSource>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            db,
            tiers,
            draws,
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<UserLocks> {
        &self.locks
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Draw a tier for a box type
    pub fn resolve_reward(&self, box_type: BoxType) -> RewardTier {
        self.tiers.resolve_reward(box_type, || self.draws.draw())
    }

    /// Per-tier probabilities for display, rarest first
    pub fn preview_odds(&self, box_type: BoxType) -> Vec<(RewardTier, f64)> {
        self.tiers.odds(box_type)
    }

    /// Pick a name uniformly from a tier's catalog pool
    pub async fn pick_reward_name(&self, tier: RewardTier) -> Result<CatalogEntry> {
        let mut candidates = sqlite::catalog_pool(self.db.pool(), tier).await?;
        if candidates.is_empty() {
            error!("Catalog has no {} names", tier);
            return Err(Error::EmptyPool(tier));
        }
        let index = self.draws.pick(candidates.len()).min(candidates.len() - 1);
        Ok(candidates.swap_remove(index))
    }

    /// Consume one box of `box_type` and grant a reward.
    ///
    /// Fails with `InsufficientInventory` when the user holds none and with
    /// `EmptyPool` when the drawn tier has no names; neither consumes a box.
    #[instrument(skip(self))]
    pub async fn open_box(&self, user_id: &str, box_type: BoxType) -> Result<RewardResult> {
        let _guard = self.locks.lock(user_id).await;

        let tier = self.resolve_reward(box_type);
        debug!("Drew {} from {} box", tier, box_type);

        let draws = &self.draws;
        let outcome = sqlite::open_box(
            self.db.pool(),
            user_id,
            box_type,
            tier,
            |len| draws.pick(len),
            Utc::now(),
        )
        .await;

        match &outcome {
            Ok(reward) => info!(
                "{} opened a {} box: {} ({}){}",
                user_id,
                box_type,
                reward.name,
                reward.tier,
                if reward.is_first_time_acquisition { ", new" } else { "" }
            ),
            Err(Error::EmptyPool(tier)) => {
                error!("No {} names in catalog; {} box left unopened", tier, box_type)
            }
            Err(Error::InsufficientInventory(_)) => debug!("{} has no {} box", user_id, box_type),
            Err(e) => warn!("Opening {} box failed: {}", box_type, e),
        }
        outcome
    }

    /// Make a previously acquired name the user's active one
    pub async fn equip_name(&self, user_id: &str, name: &str) -> Result<RewardTier> {
        let _guard = self.locks.lock(user_id).await;
        let tier = sqlite::set_active_name(self.db.pool(), user_id, name).await?;
        info!("{} equipped {} ({})", user_id, name, tier);
        Ok(tier)
    }

    /// Acquisitions newest first
    pub async fn history(&self, user_id: &str, limit: u32) -> Result<Vec<Acquisition>> {
        sqlite::list_acquisitions(self.db.pool(), user_id, limit).await
    }

    /// Load catalog entries from JSON values. Every entry is validated
    /// before any is written. Returns the number stored.
    pub async fn seed_catalog(&self, entries: Vec<serde_json::Value>) -> Result<usize> {
        let entries = entries
            .into_iter()
            .map(CatalogEntry::from_json)
            .collect::<Result<Vec<_>>>()?;

        for entry in &entries {
            sqlite::upsert_catalog_entry(self.db.pool(), entry).await?;
        }
        info!("Seeded {} catalog entries", entries.len());
        Ok(entries.len())
    }
}
