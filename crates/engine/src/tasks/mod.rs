//! Periodic background loops: offline flush and cache eviction
//!
//! Each loop ticks immediately, then every period, and can be woken early
//! (for example when connectivity returns). Timers are independent.

use crate::cache::LocalCacheStore;
use crate::sync::{ActionReplayer, OfflineQueue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Shortest accepted period; `interval` rejects zero
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Handle to control a background loop
#[derive(Clone)]
pub struct TaskHandle {
    name: &'static str,
    cancel: CancellationToken,
    enabled_tx: Arc<watch::Sender<bool>>,
    wake: Arc<Notify>,
}

impl TaskHandle {
    fn new(name: &'static str) -> Self {
        let (enabled_tx, _) = watch::channel(true);
        Self {
            name,
            cancel: CancellationToken::new(),
            enabled_tx: Arc::new(enabled_tx),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled_tx.borrow()
    }

    /// Resume running on each tick
    pub fn enable(&self) {
        self.enabled_tx.send_replace(true);
        info!("{} enabled", self.name);
    }

    /// Skip ticks but keep the task alive
    pub fn disable(&self) {
        self.enabled_tx.send_replace(false);
        info!("{} disabled", self.name);
    }

    /// Run now instead of waiting for the next tick
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the task entirely
    pub fn stop(&self) {
        self.cancel.cancel();
        info!("{} stopped", self.name);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Drive `run` on every tick or wake until cancelled
fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut run: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = TaskHandle::new(name);
    let cancel = handle.cancel.clone();
    let enabled_rx = handle.enabled_tx.subscribe();
    let wake = handle.wake.clone();

    tokio::spawn(async move {
        info!("{} started, every {:?}", name, period);
        let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("{} loop exiting", name);
                    return;
                }
                _ = interval.tick() => {}
                _ = wake.notified() => {}
            }

            if !*enabled_rx.borrow() {
                debug!("{} disabled, skipping", name);
                continue;
            }
            run().await;
        }
    });

    handle
}

/// Periodically replay the offline queue through `replayer`
pub fn spawn_flush_loop<R>(queue: Arc<OfflineQueue>, replayer: Arc<R>, period: Duration) -> TaskHandle
where
    R: ActionReplayer + 'static,
{
    spawn_periodic("Offline flush", period, move || {
        let queue = queue.clone();
        let replayer = replayer.clone();
        async move {
            if let Err(e) = queue.flush(replayer.as_ref()).await {
                error!("Offline flush failed: {}", e);
            }
        }
    })
}

/// Evict cache entries older than `retention`, at start and every `period`
pub fn spawn_eviction_sweep(
    cache: Arc<LocalCacheStore>,
    retention: Duration,
    period: Duration,
) -> TaskHandle {
    spawn_periodic("Cache eviction", period, move || {
        let cache = cache.clone();
        async move {
            if let Err(e) = cache.evict_older_than(retention).await {
                error!("Cache eviction failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RetryPolicy;
    use chrono::Utc;
    use otakudex_core::{ActionType, CachedMedia, MediaDetails, MediaId, OfflineAction, Result};
    use otakudex_persistence::{sqlite, Database, PayloadEncryptor};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend(AtomicUsize);

    impl ActionReplayer for CountingBackend {
        async fn replay(&self, _action: &OfflineAction) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_flush_loop_drains_queue() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let enc = Arc::new(PayloadEncryptor::from_password("tasks-test").unwrap());
        let queue = Arc::new(OfflineQueue::open(db, enc, RetryPolicy::default()).await.unwrap());
        queue
            .enqueue(
                OfflineAction::new(
                    ActionType::RateTitle,
                    json!({ "media_id": 21, "media_kind": "anime", "score": 9 }),
                )
                .unwrap(),
            )
            .await;

        let backend = Arc::new(CountingBackend::default());
        let handle = spawn_flush_loop(queue.clone(), backend.clone(), Duration::from_secs(3600));
        wait_for(|| backend.0.load(Ordering::SeqCst) == 1).await;
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        // Woken early rather than waiting an hour
        queue
            .enqueue(
                OfflineAction::new(
                    ActionType::AddToList,
                    json!({ "media_id": 22, "media_kind": "manga", "status": "reading" }),
                )
                .unwrap(),
            )
            .await;
        handle.wake();
        wait_for(|| backend.0.load(Ordering::SeqCst) == 2).await;

        handle.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_eviction_runs_at_start() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let stale = CachedMedia {
            id: MediaId::anime(1),
            title: "Cowboy Bebop".to_string(),
            image_url: None,
            synopsis: None,
            score: None,
            details: MediaDetails::Anime {
                episodes: Some(26),
                status: None,
            },
            cached_at: Utc::now() - chrono::Duration::days(30),
        };
        sqlite::upsert_media(db.pool(), &stale).await.unwrap();

        let cache = Arc::new(LocalCacheStore::new(db));
        let handle = spawn_eviction_sweep(
            cache.clone(),
            Duration::from_secs(7 * 24 * 3600),
            Duration::from_secs(3600),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.get(stale.id).await.unwrap().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        handle.stop();
    }

    #[tokio::test]
    async fn test_handle_toggles() {
        let handle = spawn_periodic("Test loop", Duration::from_secs(3600), || async {});
        assert!(handle.is_enabled());
        handle.disable();
        assert!(!handle.is_enabled());
        handle.enable();
        assert!(handle.is_enabled());
        assert_eq!(handle.name(), "Test loop");
        handle.stop();
    }
}
