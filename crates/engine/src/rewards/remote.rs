//! Reward operations run by the hosted backend
//!
//! For signed-in users the backend owns the authoritative ledger. Calls for
//! one user go through the same [`UserLocks`] as the local services so a
//! double-tap cannot submit two openings at once.

use super::UserLocks;
use otakudex_core::{ActivityType, BoxType, Result, RewardResult, UserRewardState};
use otakudex_networking::{api, BackendClient};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Server-side reward procedures
pub trait RewardBackend: Send + Sync + 'static {
    fn open_box(
        &self,
        user_id: &str,
        box_type: BoxType,
    ) -> impl Future<Output = Result<RewardResult>> + Send;

    fn add_points(&self, user_id: &str, delta: i64) -> impl Future<Output = Result<bool>> + Send;

    fn summary(&self, user_id: &str) -> impl Future<Output = Result<UserRewardState>> + Send;
}

impl RewardBackend for BackendClient {
    async fn open_box(&self, user_id: &str, box_type: BoxType) -> Result<RewardResult> {
        api::open_loot_box(self, user_id, box_type).await
    }

    async fn add_points(&self, user_id: &str, delta: i64) -> Result<bool> {
        api::add_user_points(self, user_id, delta).await
    }

    async fn summary(&self, user_id: &str) -> Result<UserRewardState> {
        api::get_user_summary(self, user_id).await
    }
}

pub struct RemoteRewards<B> {
    backend: Arc<B>,
    locks: Arc<UserLocks>,
}

impl<B: RewardBackend> RemoteRewards<B> {
    pub fn new(backend: Arc<B>, locks: Arc<UserLocks>) -> Self {
        Self { backend, locks }
    }

    pub fn locks(&self) -> &Arc<UserLocks> {
        &self.locks
    }

    /// Open a box server-side
    #[instrument(skip(self))]
    pub async fn open_box(&self, user_id: &str, box_type: BoxType) -> Result<RewardResult> {
        let _guard = self.locks.lock(user_id).await;
        match self.backend.open_box(user_id, box_type).await {
            Ok(reward) => {
                info!("{} opened a {} box remotely: {} ({})", user_id, box_type, reward.name, reward.tier);
                Ok(reward)
            }
            Err(e) => {
                warn!("Remote {} box opening for {} failed: {}", box_type, user_id, e);
                Err(e)
            }
        }
    }

    /// Award points for an activity. `false` means the backend refused the
    /// delta because the total would go negative.
    #[instrument(skip(self))]
    pub async fn award_points(
        &self,
        user_id: &str,
        activity: ActivityType,
        points: i64,
    ) -> Result<bool> {
        let _guard = self.locks.lock(user_id).await;
        let applied = self.backend.add_points(user_id, points).await?;
        if applied {
            debug!("Backend applied {} points for {} ({})", points, user_id, activity);
        } else {
            debug!("Backend refused {} points for {}", points, user_id);
        }
        Ok(applied)
    }

    /// The backend's view of the user's points, boxes and active name
    pub async fn summary(&self, user_id: &str) -> Result<UserRewardState> {
        self.backend.summary(user_id).await
    }
}
