//! Device-local cache of media details and recent searches

use chrono::{DateTime, Utc};
use otakudex_core::{CachedMedia, Error, MediaId, Result, SearchEntry};
use otakudex_persistence::{sqlite, Database};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Distinct searches kept in history
pub const DEFAULT_SEARCH_HISTORY: u32 = 20;

/// Read-through cache backed by the local database.
///
/// Entries never expire on read; [`LocalCacheStore::evict_older_than`] is
/// called by the periodic eviction sweep.
pub struct LocalCacheStore {
    db: Arc<Database>,
    search_history_size: u32,
}

impl LocalCacheStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            search_history_size: DEFAULT_SEARCH_HISTORY,
        }
    }

    /// Keep a different number of recent searches
    pub fn with_search_history(mut self, size: u32) -> Self {
        self.search_history_size = size.max(1);
        self
    }

    /// Millisecond precision, matching what storage keeps
    fn now() -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    /// Store a record, stamping it as cached now. Returns the stored copy.
    pub async fn put(&self, mut media: CachedMedia) -> Result<CachedMedia> {
        media.cached_at = Self::now();
        sqlite::upsert_media(self.db.pool(), &media).await?;
        debug!("Cached {}", media.id);
        Ok(media)
    }

    pub async fn get(&self, id: MediaId) -> Result<Option<CachedMedia>> {
        sqlite::get_media(self.db.pool(), id).await
    }

    /// Most recently cached records first
    pub async fn recent(&self, limit: u32) -> Result<Vec<CachedMedia>> {
        sqlite::recent_media(self.db.pool(), limit).await
    }

    /// Remove records cached longer ago than `window`. Returns how many went.
    pub async fn evict_older_than(&self, window: Duration) -> Result<u64> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| Error::InvalidData(format!("eviction window: {}", e)))?;
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let removed = sqlite::delete_media_older_than(self.db.pool(), cutoff).await?;
        if removed > 0 {
            info!("Evicted {} cached records older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    /// Fetch fresh data and cache it; on a network failure fall back to the
    /// cached copy if there is one.
    pub async fn fetch_or_cached<F, Fut>(&self, id: MediaId, fetch: F) -> Result<CachedMedia>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedMedia>>,
    {
        match fetch().await {
            Ok(fresh) if fresh.id == id => self.put(fresh).await,
            Ok(fresh) => Err(Error::InvalidData(format!("asked for {}, got {}", id, fresh.id))),
            Err(e) if e.is_retryable() => match self.get(id).await? {
                Some(cached) => {
                    warn!("Serving cached {} after fetch failed: {}", id, e);
                    Ok(cached)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Remember a search. Blank queries are ignored.
    pub async fn record_search(&self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(());
        }
        sqlite::record_search(self.db.pool(), query, Utc::now(), self.search_history_size).await
    }

    pub async fn recent_searches(&self, limit: u32) -> Result<Vec<SearchEntry>> {
        sqlite::recent_searches(self.db.pool(), limit).await
    }

    pub async fn clear_searches(&self) -> Result<()> {
        sqlite::clear_searches(self.db.pool()).await
    }
}
