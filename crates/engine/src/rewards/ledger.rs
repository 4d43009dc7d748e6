//! Point ledger: earning, spending and daily logins

use super::{DrawSource, UserLocks};
use chrono::{NaiveDate, Utc};
use otakudex_core::{
    ActivityType, BoxType, Error, LoginOutcome, Result, RewardTier, UserRewardState,
};
use otakudex_persistence::sqlite::{self, ActivityRow};
use otakudex_persistence::Database;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Point balances and box purchases for local users.
///
/// Days are UTC calendar days; the daily counter and login streak roll over
/// at midnight UTC.
pub struct PointLedger {
    db: Arc<Database>,
    draws: Arc<dyn DrawSource>,
    locks: Arc<UserLocks>,
}

impl PointLedger {
    /// `locks` should be shared with the [`super::RewardService`] over the
    /// same database so spends and openings for one user never interleave.
    pub fn new(db: Arc<Database>, draws: Arc<dyn DrawSource>, locks: Arc<UserLocks>) -> Self {
        Self { db, draws, locks }
    }

    pub fn locks(&self) -> &Arc<UserLocks> {
        &self.locks
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Create reward state for a new user with a random COMMON name.
    ///
    /// Signing up twice returns the existing state unchanged.
    #[instrument(skip(self))]
    pub async fn create_user(&self, user_id: &str) -> Result<UserRewardState> {
        let pool = sqlite::catalog_pool(self.db.pool(), RewardTier::Common).await?;
        if pool.is_empty() {
            return Err(Error::EmptyPool(RewardTier::Common));
        }
        let name = &pool[self.draws.pick(pool.len()).min(pool.len() - 1)].name;

        if sqlite::create_user_state(self.db.pool(), user_id, name, RewardTier::Common).await? {
            info!("Created reward state for {} as {}", user_id, name);
        } else {
            debug!("Reward state for {} already exists", user_id);
        }
        self.summary(user_id).await
    }

    /// Add (or with a negative value, remove) points.
    ///
    /// Returns `false` and changes nothing if the total would go negative.
    #[instrument(skip(self))]
    pub async fn award_points(
        &self,
        user_id: &str,
        activity: ActivityType,
        points: i64,
    ) -> Result<bool> {
        let _guard = self.locks.lock(user_id).await;
        let applied =
            sqlite::award_points(self.db.pool(), user_id, activity, points, Self::today()).await?;
        if !applied {
            debug!("Rejected {} points for {}: total would go negative", points, user_id);
        }
        Ok(applied)
    }

    /// Award the standard amount for an activity
    pub async fn award_activity(&self, user_id: &str, activity: ActivityType) -> Result<bool> {
        self.award_points(user_id, activity, activity.default_points()).await
    }

    /// Spend `amount` points on one box of `box_type`.
    ///
    /// Fails with `InsufficientFunds` when the balance is short.
    #[instrument(skip(self))]
    pub async fn spend_points(&self, user_id: &str, amount: i64, box_type: BoxType) -> Result<bool> {
        let _guard = self.locks.lock(user_id).await;
        sqlite::spend_points(self.db.pool(), user_id, amount, box_type).await?;
        info!("{} bought a {} box for {} points", user_id, box_type, amount);
        Ok(true)
    }

    /// Buy a box at its list price
    pub async fn purchase_box(&self, user_id: &str, box_type: BoxType) -> Result<bool> {
        self.spend_points(user_id, box_type.cost(), box_type).await
    }

    /// Record today's login and award the streak bonus once per day
    #[instrument(skip(self))]
    pub async fn record_daily_login(&self, user_id: &str) -> Result<LoginOutcome> {
        self.record_login_on(user_id, Self::today()).await
    }

    async fn record_login_on(&self, user_id: &str, today: NaiveDate) -> Result<LoginOutcome> {
        let _guard = self.locks.lock(user_id).await;
        let outcome = sqlite::record_daily_login(self.db.pool(), user_id, today).await?;
        if outcome.points_awarded > 0 {
            info!(
                "{} logged in, streak {}, +{} points",
                user_id, outcome.login_streak, outcome.points_awarded
            );
        }
        Ok(outcome)
    }

    /// Current points, streak, boxes and active name
    pub async fn summary(&self, user_id: &str) -> Result<UserRewardState> {
        sqlite::get_user_state(self.db.pool(), user_id, Self::today())
            .await?
            .filter(|state| !state.archived)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    /// Latest ledger entries, newest first
    pub async fn recent_activity(&self, user_id: &str, limit: u32) -> Result<Vec<ActivityRow>> {
        sqlite::list_activities(self.db.pool(), user_id, limit).await
    }

    /// Soft-archive a user. Later calls for them fail with `UserNotFound`.
    pub async fn archive_user(&self, user_id: &str) -> Result<()> {
        let _guard = self.locks.lock(user_id).await;
        sqlite::archive_user_state(self.db.pool(), user_id).await?;
        info!("Archived reward state for {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::{FixedDraws, RewardService};
    use otakudex_core::{CatalogEntry, RewardSource, TierTable};

    async fn ledger() -> (PointLedger, Arc<Database>) {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        for name in ["Moonlit Drifter", "Quiet Ronin"] {
            sqlite::upsert_catalog_entry(
                db.pool(),
                &CatalogEntry {
                    name: name.to_string(),
                    tier: RewardTier::Common,
                    source: RewardSource::Generated {
                        method: "wordlist".to_string(),
                    },
                },
            )
            .await
            .unwrap();
        }
        let ledger = PointLedger::new(
            db.clone(),
            Arc::new(FixedDraws::new(&[], 1)),
            Arc::new(UserLocks::new()),
        );
        (ledger, db)
    }

    #[tokio::test]
    async fn test_create_user_starts_empty() {
        let (ledger, _db) = ledger().await;
        let state = ledger.create_user("u1").await.unwrap();
        assert_eq!(state.total_points, 0);
        assert_eq!(state.current_active_name, "Quiet Ronin");
        assert_eq!(state.current_active_tier, RewardTier::Common);

        ledger.award_points("u1", ActivityType::AddToList, 5).await.unwrap();
        let again = ledger.create_user("u1").await.unwrap();
        assert_eq!(again.total_points, 5);
    }

    #[tokio::test]
    async fn test_create_user_needs_common_names() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let ledger = PointLedger::new(db, Arc::new(FixedDraws::new(&[], 0)), Arc::new(UserLocks::new()));
        assert!(matches!(
            ledger.create_user("u1").await,
            Err(Error::EmptyPool(RewardTier::Common))
        ));
    }

    #[tokio::test]
    async fn test_award_never_goes_negative() {
        let (ledger, _db) = ledger().await;
        ledger.create_user("u1").await.unwrap();

        assert!(ledger.award_activity("u1", ActivityType::CompleteTitle).await.unwrap());
        assert!(!ledger.award_points("u1", ActivityType::Adjustment, -30).await.unwrap());

        let state = ledger.summary("u1").await.unwrap();
        assert_eq!(state.total_points, 25);
        assert_eq!(state.daily_points, 25);
        assert_eq!(ledger.recent_activity("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purchase_then_open_standard_box() {
        let (ledger, db) = ledger().await;
        ledger.create_user("u1").await.unwrap();
        ledger.award_points("u1", ActivityType::Adjustment, 100).await.unwrap();

        assert!(ledger.purchase_box("u1", BoxType::Standard).await.unwrap());
        let state = ledger.summary("u1").await.unwrap();
        assert_eq!(state.total_points, 0);
        assert_eq!(state.boxes(BoxType::Standard), 1);

        let rewards = RewardService::new(
            db,
            Arc::new(TierTable::standard()),
            Arc::new(FixedDraws::new(&[0.7], 0)),
            Arc::new(UserLocks::new()),
        );
        let reward = rewards.open_box("u1", BoxType::Standard).await.unwrap();
        assert_eq!(reward.tier, RewardTier::Common);
        assert_eq!(ledger.summary("u1").await.unwrap().boxes(BoxType::Standard), 0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let (ledger, _db) = ledger().await;
        ledger.create_user("u1").await.unwrap();
        ledger.award_points("u1", ActivityType::Adjustment, 299).await.unwrap();

        match ledger.purchase_box("u1", BoxType::Premium).await {
            Err(Error::InsufficientFunds { required, available }) => {
                assert_eq!(required, 300);
                assert_eq!(available, 299);
            }
            other => panic!("unexpected {:?}", other),
        }
        let state = ledger.summary("u1").await.unwrap();
        assert_eq!(state.total_points, 299);
        assert_eq!(state.boxes(BoxType::Premium), 0);

        assert!(matches!(
            ledger.spend_points("u1", 0, BoxType::Standard).await,
            Err(Error::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_login_streak() {
        let (ledger, _db) = ledger().await;
        ledger.create_user("u1").await.unwrap();
        let day = |d: u32| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();

        let first = ledger.record_login_on("u1", day(1)).await.unwrap();
        assert_eq!((first.login_streak, first.points_awarded), (1, 15));

        let repeat = ledger.record_login_on("u1", day(1)).await.unwrap();
        assert_eq!((repeat.login_streak, repeat.points_awarded), (1, 0));

        let next = ledger.record_login_on("u1", day(2)).await.unwrap();
        assert_eq!((next.login_streak, next.points_awarded), (2, 20));

        let gap = ledger.record_login_on("u1", day(5)).await.unwrap();
        assert_eq!((gap.login_streak, gap.points_awarded), (1, 15));
    }

    #[tokio::test]
    async fn test_archived_user_is_gone() {
        let (ledger, _db) = ledger().await;
        ledger.create_user("u1").await.unwrap();
        ledger.archive_user("u1").await.unwrap();

        assert!(matches!(ledger.summary("u1").await, Err(Error::UserNotFound(_))));
        assert!(matches!(
            ledger.award_points("u1", ActivityType::RateTitle, 3).await,
            Err(Error::UserNotFound(_))
        ));
        assert!(matches!(ledger.archive_user("u1").await, Err(Error::UserNotFound(_))));
    }
}
