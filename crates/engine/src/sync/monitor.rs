//! Catalog sync progress monitor
//!
//! Polls backend row counts while a catalog sync is running elsewhere and
//! publishes the latest numbers. The loop belongs to whoever holds the
//! handle and ends when it is stopped or dropped.

use otakudex_core::Result;
use otakudex_networking::{api, api::CatalogCounts, BackendClient};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where catalog counts come from
pub trait ProgressSource: Send + Sync + 'static {
    fn counts(&self) -> impl Future<Output = Result<CatalogCounts>> + Send;
}

impl ProgressSource for BackendClient {
    async fn counts(&self) -> Result<CatalogCounts> {
        api::catalog_counts(self).await
    }
}

/// Latest observed catalog size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub anime: u64,
    pub manga: u64,
    /// Counts changed since the previous poll
    pub active: bool,
}

/// Owner of a running monitor
pub struct SyncMonitorHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<SyncProgress>,
}

impl SyncMonitorHandle {
    /// Most recent progress
    pub fn progress(&self) -> SyncProgress {
        *self.progress.borrow()
    }

    /// Watch progress updates
    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.progress.clone()
    }

    /// Stop polling
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SyncMonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct SyncMonitor;

impl SyncMonitor {
    /// Start polling `source` every `period`
    pub fn spawn<S: ProgressSource>(source: Arc<S>, period: Duration) -> SyncMonitorHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(SyncProgress::default());

        tokio::spawn(monitor_loop(source, period, cancel.clone(), tx));

        SyncMonitorHandle {
            cancel,
            progress: rx,
        }
    }
}

async fn monitor_loop<S: ProgressSource>(
    source: Arc<S>,
    period: Duration,
    cancel: CancellationToken,
    tx: watch::Sender<SyncProgress>,
) {
    info!("Sync monitor started");
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(10)));
    let mut last: Option<CatalogCounts> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Sync monitor stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let progress = match source.counts().await {
            Ok(counts) => {
                let active = last.is_some_and(|prev| prev != counts);
                last = Some(counts);
                SyncProgress {
                    anime: counts.anime,
                    manga: counts.manga,
                    active,
                }
            }
            Err(e) => {
                debug!("Sync progress poll failed: {}", e);
                SyncProgress {
                    active: false,
                    ..*tx.borrow()
                }
            }
        };

        tx.send_replace(progress);
    }
}
