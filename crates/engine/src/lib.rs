//! Otakudex Engine - reward opening, point ledger, offline sync and caching

pub mod cache;
pub mod rewards;
pub mod sync;
pub mod tasks;

pub use cache::LocalCacheStore;
pub use rewards::{
    DrawSource, OsDrawSource, PointLedger, RemoteRewards, RewardBackend, RewardService, UserLocks,
};
pub use sync::{
    ActionReplayer, OfflineQueue, ProgressSource, RetryPolicy, SyncMonitor, SyncMonitorHandle,
    SyncProgress,
};
pub use tasks::{spawn_eviction_sweep, spawn_flush_loop, TaskHandle};
