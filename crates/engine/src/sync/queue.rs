//! Durable queue of mutations made while offline
//!
//! Actions are stored sealed in SQLite in enqueue order and replayed by
//! [`OfflineQueue::flush`]. Replay is FIFO per target entity: once an action
//! for an entity fails, later actions for that entity wait for the next
//! flush so they can never overtake it.

use super::{ActionReplayer, RetryPolicy};
use otakudex_core::{
    ActionState, DeadLetter, Error, FlushReport, MediaId, OfflineAction, Result,
};
use otakudex_persistence::{sqlite, Database, PayloadEncryptor};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

/// Buffered flush reports per subscriber
const REPORT_CHANNEL_CAPACITY: usize = 16;

/// Offline action queue
pub struct OfflineQueue {
    db: Arc<Database>,
    encryptor: Arc<PayloadEncryptor>,
    policy: RetryPolicy,
    /// Actions whose insert failed, oldest first
    spill: Mutex<VecDeque<OfflineAction>>,
    flush_lock: AsyncMutex<()>,
    reports: broadcast::Sender<FlushReport>,
}

impl OfflineQueue {
    /// Open the queue, returning actions stranded in flight by a crash to pending
    pub async fn open(
        db: Arc<Database>,
        encryptor: Arc<PayloadEncryptor>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let recovered = sqlite::reset_in_flight(db.pool()).await?;
        if recovered > 0 {
            warn!("Recovered {} offline actions interrupted mid-replay", recovered);
        }

        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Ok(Self {
            db,
            encryptor,
            policy,
            spill: Mutex::new(VecDeque::new()),
            flush_lock: AsyncMutex::new(()),
            reports,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue an action for replay. Never fails: if storage is unavailable the
    /// action is held in memory until a later enqueue or flush persists it.
    pub async fn enqueue(&self, action: OfflineAction) {
        let id = action.id.clone();
        let action_type = action.action_type;

        // Spilled actions are older and must be stored first
        if self.persist_spill().await {
            match sqlite::insert_action(self.db.pool(), &self.encryptor, &action).await {
                Ok(seq) => {
                    debug!("Queued {} {} as #{}", action_type, id, seq);
                    return;
                }
                Err(e) => warn!("Could not store offline action {}: {}", id, e),
            }
        }

        self.lock_spill().push_back(action);
        warn!("Holding offline action {} in memory", id);
    }

    fn lock_spill(&self) -> std::sync::MutexGuard<'_, VecDeque<OfflineAction>> {
        self.spill.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move spilled actions into storage in order. Returns `true` once the
    /// spill list is empty.
    async fn persist_spill(&self) -> bool {
        loop {
            let next = self.lock_spill().front().cloned();
            let Some(action) = next else {
                return true;
            };
            match sqlite::insert_action(self.db.pool(), &self.encryptor, &action).await {
                Ok(_) => {
                    let mut spill = self.lock_spill();
                    if spill.front().map(|a| a.id.as_str()) == Some(action.id.as_str()) {
                        spill.pop_front();
                    }
                }
                Err(e) => {
                    debug!("Spilled actions still unsaved: {}", e);
                    return false;
                }
            }
        }
    }

    /// Replay every pending action once.
    ///
    /// Only one flush runs at a time. Actions enqueued while a flush is
    /// running are left for the next one.
    pub async fn flush<R: ActionReplayer>(&self, replayer: &R) -> Result<FlushReport> {
        let _guard = self.flush_lock.lock().await;

        if !self.persist_spill().await {
            warn!("Flushing without {} unsaved actions", self.lock_spill().len());
        }
        // Nothing else can be mid-replay while the flush lock is held
        sqlite::reset_in_flight(self.db.pool()).await?;

        let pending = sqlite::load_actions(self.db.pool(), &self.encryptor, ActionState::Pending).await?;
        let mut report = FlushReport::default();
        let mut blocked: HashSet<MediaId> = HashSet::new();

        for queued in pending {
            let action = queued.action;
            if blocked.contains(&action.target) {
                report.still_pending.push(action.id);
                continue;
            }
            // Discarded since the snapshot was taken
            if !sqlite::mark_in_flight(self.db.pool(), &action.id).await? {
                continue;
            }

            match self.replay_one(replayer, &action).await {
                Ok(()) => {
                    sqlite::delete_action(self.db.pool(), &action.id).await?;
                    debug!("Replayed {} {} for {}", action.action_type, action.id, action.target);
                    report.confirmed.push(action.id);
                }
                Err(e) if e.is_retryable() => {
                    let state = sqlite::record_failure(
                        self.db.pool(),
                        &action.id,
                        &e.to_string(),
                        self.policy.max_retries,
                    )
                    .await?;

                    if state == ActionState::Dead {
                        error!(
                            "Giving up on {} {} after {} attempts: {}",
                            action.action_type,
                            action.id,
                            action.retry_count + 1,
                            e
                        );
                        report.dead_lettered.push(action.id);
                    } else {
                        warn!("Replay of {} {} failed, will retry: {}", action.action_type, action.id, e);
                        blocked.insert(action.target);
                        report.still_pending.push(action.id);
                    }
                }
                Err(e) => {
                    sqlite::mark_dead(self.db.pool(), &action.id, &e.to_string()).await?;
                    error!("Backend refused {} {}: {}", action.action_type, action.id, e);
                    report.dead_lettered.push(action.id);
                }
            }
        }

        if !report.confirmed.is_empty() {
            info!(
                "Offline flush confirmed {}, pending {}, dead {}",
                report.confirmed.len(),
                report.still_pending.len(),
                report.dead_lettered.len()
            );
        }
        if !report.is_empty() {
            // No subscribers is fine
            let _ = self.reports.send(report.clone());
        }
        Ok(report)
    }

    async fn replay_one<R: ActionReplayer>(&self, replayer: &R, action: &OfflineAction) -> Result<()> {
        match tokio::time::timeout(self.policy.request_timeout(), replayer.replay(action)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.policy.request_timeout_ms)),
        }
    }

    /// Actions still waiting to be confirmed, including unsaved ones
    pub async fn pending_count(&self) -> Result<u32> {
        let stored = sqlite::count_actions(self.db.pool(), ActionState::Pending).await?
            + sqlite::count_actions(self.db.pool(), ActionState::InFlight).await?;
        Ok(stored + self.lock_spill().len() as u32)
    }

    /// Actions that will not be retried, oldest first
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let dead = sqlite::load_actions(self.db.pool(), &self.encryptor, ActionState::Dead).await?;
        Ok(dead
            .into_iter()
            .map(|q| DeadLetter {
                action: q.action,
                last_error: q.last_error.unwrap_or_default(),
            })
            .collect())
    }

    /// Drop a dead-lettered action. Returns `false` if no such dead action exists.
    pub async fn discard(&self, id: &str) -> Result<bool> {
        let removed = sqlite::delete_dead_action(self.db.pool(), id).await?;
        if removed {
            info!("Discarded dead offline action {}", id);
        }
        Ok(removed)
    }

    /// Receive a report after every flush that touched something
    pub fn subscribe(&self) -> broadcast::Receiver<FlushReport> {
        self.reports.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otakudex_core::ActionType;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Records calls; fails the first `fail_first` calls with the given error
    #[derive(Default)]
    struct FakeBackend {
        fail_first: Mutex<u32>,
        failure: Option<fn() -> Error>,
        slow: bool,
        calls: Mutex<Vec<String>>,
        progress: Mutex<HashMap<MediaId, u64>>,
    }

    impl FakeBackend {
        fn failing(times: u32, failure: fn() -> Error) -> Self {
            Self {
                fail_first: Mutex::new(times),
                failure: Some(failure),
                ..Default::default()
            }
        }
    }

    impl ActionReplayer for FakeBackend {
        async fn replay(&self, action: &OfflineAction) -> Result<()> {
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.calls.lock().unwrap().push(action.id.clone());
            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err((self.failure.unwrap())());
                }
            }
            if let Some(p) = action.payload.get("progress").and_then(|p| p.as_u64()) {
                self.progress.lock().unwrap().insert(action.target, p);
            }
            Ok(())
        }
    }

    fn progress(media_id: i64, progress: u64) -> OfflineAction {
        OfflineAction::new(
            ActionType::UpdateProgress,
            json!({ "media_id": media_id, "media_kind": "anime", "progress": progress }),
        )
        .unwrap()
    }

    async fn queue(max_retries: u32) -> OfflineQueue {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let enc = Arc::new(PayloadEncryptor::from_password("queue-test").unwrap());
        OfflineQueue::open(
            db,
            enc,
            RetryPolicy {
                max_retries,
                request_timeout_ms: 200,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_flush_confirms_and_empties() {
        let queue = queue(5).await;
        let backend = FakeBackend::default();
        queue.enqueue(progress(1, 3)).await;
        queue.enqueue(progress(2, 7)).await;
        assert_eq!(queue.pending_count().await.unwrap(), 2);

        let report = queue.flush(&backend).await.unwrap();
        assert_eq!(report.confirmed.len(), 2);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert!(queue.flush(&backend).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_action_blocks_its_entity_only() {
        let queue = queue(5).await;
        let backend = FakeBackend::failing(1, || Error::NetworkError("offline".to_string()));

        let p3 = progress(1, 3);
        let p5 = progress(1, 5);
        let other = progress(2, 9);
        queue.enqueue(p3.clone()).await;
        queue.enqueue(p5.clone()).await;
        queue.enqueue(other.clone()).await;

        let first = queue.flush(&backend).await.unwrap();
        assert_eq!(first.confirmed, vec![other.id.clone()]);
        assert_eq!(first.still_pending, vec![p3.id.clone(), p5.id.clone()]);

        let second = queue.flush(&backend).await.unwrap();
        assert_eq!(second.confirmed, vec![p3.id.clone(), p5.id.clone()]);

        // p5 was never sent before p3 succeeded
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![p3.id.clone(), other.id, p3.id, p5.id]);
        assert_eq!(backend.progress.lock().unwrap()[&MediaId::anime(1)], 5);
    }

    #[tokio::test]
    async fn test_retry_ceiling_dead_letters() {
        let queue = queue(2).await;
        let backend = FakeBackend::failing(10, || Error::Timeout(200));
        let a = progress(4, 1);
        let b = progress(4, 2);
        queue.enqueue(a.clone()).await;
        queue.enqueue(b.clone()).await;

        let first = queue.flush(&backend).await.unwrap();
        assert_eq!(first.still_pending.len(), 2);

        // Second failure kills `a`, which then stops blocking `b`
        let second = queue.flush(&backend).await.unwrap();
        assert_eq!(second.dead_lettered, vec![a.id.clone()]);

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].action.id, a.id);
        assert_eq!(dead[0].action.retry_count, 2);

        assert!(queue.discard(&a.id).await.unwrap());
        assert!(!queue.discard(&a.id).await.unwrap());
        assert!(queue.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_dead_immediately() {
        let queue = queue(5).await;
        let backend = FakeBackend::failing(1, || Error::RemoteRejected {
            status: 400,
            message: "progress exceeds episode count".to_string(),
        });
        let a = progress(8, 999);
        queue.enqueue(a.clone()).await;

        let report = queue.flush(&backend).await.unwrap();
        assert_eq!(report.dead_lettered, vec![a.id]);
        let dead = queue.dead_letters().await.unwrap();
        assert!(dead[0].last_error.contains("progress exceeds episode count"));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slow_replay_times_out() {
        let queue = queue(5).await;
        let backend = FakeBackend {
            slow: true,
            ..Default::default()
        };
        queue.enqueue(progress(3, 1)).await;

        let report = queue.flush(&backend).await.unwrap();
        assert_eq!(report.still_pending.len(), 1);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_get_reports() {
        let queue = queue(5).await;
        let mut reports = queue.subscribe();
        queue.enqueue(progress(1, 1)).await;

        queue.flush(&FakeBackend::default()).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report.confirmed.len(), 1);
    }

    #[tokio::test]
    async fn test_row_sealed_with_old_key_does_not_wedge_queue() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let old_key = PayloadEncryptor::from_password("host-a").unwrap();
        let stale = progress(1, 2);
        sqlite::insert_action(db.pool(), &old_key, &stale).await.unwrap();

        let new_key = Arc::new(PayloadEncryptor::from_password("host-b").unwrap());
        let queue = OfflineQueue::open(db, new_key, RetryPolicy::default()).await.unwrap();
        let rating = OfflineAction::new(
            ActionType::RateTitle,
            json!({ "media_id": 7, "media_kind": "anime", "score": 8 }),
        )
        .unwrap();
        queue.enqueue(rating.clone()).await;

        let backend = FakeBackend::default();
        let report = queue.flush(&backend).await.unwrap();
        assert_eq!(report.confirmed, vec![rating.id.clone()]);
        assert_eq!(*backend.calls.lock().unwrap(), vec![rating.id]);
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].action.id, stale.id);
        assert!(queue.discard(&stale.id).await.unwrap());

        // Later flushes keep working
        queue.enqueue(progress(1, 3)).await;
        assert_eq!(queue.flush(&backend).await.unwrap().confirmed.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_recovers_in_flight() {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        let enc = Arc::new(PayloadEncryptor::from_password("queue-test").unwrap());
        let a = progress(1, 1);
        sqlite::insert_action(db.pool(), &enc, &a).await.unwrap();
        sqlite::mark_in_flight(db.pool(), &a.id).await.unwrap();

        let queue = OfflineQueue::open(db, enc, RetryPolicy::default()).await.unwrap();
        let report = queue.flush(&FakeBackend::default()).await.unwrap();
        assert_eq!(report.confirmed, vec![a.id]);
    }
}
