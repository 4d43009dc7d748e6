//! Service wiring shared by the background tasks

use crate::config::Config;
use anyhow::{Context, Result};
use otakudex_core::TierTable;
use otakudex_engine::{
    LocalCacheStore, OfflineQueue, OsDrawSource, PointLedger, RemoteRewards, RetryPolicy,
    RewardService, UserLocks,
};
use otakudex_networking::{BackendClient, ClientConfig};
use otakudex_persistence::{Database, PayloadEncryptor};
use std::sync::Arc;

/// Everything the daemon runs on, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub client: Arc<BackendClient>,
    pub queue: Arc<OfflineQueue>,
    pub cache: Arc<LocalCacheStore>,
    pub rewards: Arc<RewardService>,
    pub ledger: Arc<PointLedger>,
    pub remote_rewards: Arc<RemoteRewards<BackendClient>>,
}

impl AppState {
    /// Open the database and build the services over it
    pub async fn init(config: &Config, encryption_key: &[u8]) -> Result<Self> {
        let encryptor = Arc::new(
            PayloadEncryptor::new(encryption_key).context("Failed to create payload encryptor")?,
        );

        let db_path = config.db_path();
        let db = Arc::new(
            Database::connect(&db_path)
                .await
                .with_context(|| format!("Failed to open {}", db_path.display()))?,
        );

        let client = Arc::new(
            BackendClient::new(ClientConfig {
                base_url: config.backend_url.clone(),
                api_key: config.api_key.clone(),
                session_token: config.session_token.clone(),
                timeout: config.request_timeout,
            })
            .context("Failed to create backend client")?,
        );

        let policy = RetryPolicy {
            max_retries: config.max_retries,
            request_timeout_ms: config.request_timeout.as_millis() as u64,
        };
        let queue = Arc::new(
            OfflineQueue::open(db.clone(), encryptor, policy)
                .await
                .context("Failed to open offline queue")?,
        );

        // One lock set so local and remote reward calls for a user never interleave
        let locks = Arc::new(UserLocks::new());
        let draws = Arc::new(OsDrawSource);

        Ok(Self {
            cache: Arc::new(LocalCacheStore::new(db.clone())),
            rewards: Arc::new(RewardService::new(
                db.clone(),
                Arc::new(TierTable::standard()),
                draws.clone(),
                locks.clone(),
            )),
            ledger: Arc::new(PointLedger::new(db.clone(), draws, locks.clone())),
            remote_rewards: Arc::new(RemoteRewards::new(client.clone(), locks)),
            db,
            client,
            queue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reward_services_share_user_locks() {
        let data_dir = std::env::temp_dir().join(format!(
            "otakudex-state-{}-{}",
            std::process::id(),
            unique_suffix()
        ));
        let config = Config {
            backend_url: "https://backend.example".to_string(),
            api_key: "anon-key".to_string(),
            session_token: None,
            user_id: None,
            data_dir: data_dir.clone(),
            catalog_file: None,
            flush_interval: Duration::from_secs(30),
            eviction_interval: Duration::from_secs(3600),
            cache_retention: Duration::from_secs(7 * 24 * 3600),
            request_timeout: Duration::from_secs(5),
            max_retries: 5,
            sync_poll: Duration::ZERO,
        };

        let state = AppState::init(&config, &[7u8; 32]).await.unwrap();
        assert!(Arc::ptr_eq(state.rewards.locks(), state.ledger.locks()));
        assert!(Arc::ptr_eq(state.rewards.locks(), state.remote_rewards.locks()));

        // A lock taken through one service is seen by the others
        let _guard = state.ledger.locks().lock("u1").await;
        assert_eq!(state.rewards.locks().len(), 1);

        state.db.pool().close().await;
        let _ = std::fs::remove_dir_all(&data_dir);
    }

    fn unique_suffix() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    }
}
