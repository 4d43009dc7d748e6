//! Catalog sync progress

use crate::BackendClient;
use otakudex_core::Result;

/// Rows currently stored for anime and manga
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogCounts {
    pub anime: u64,
    pub manga: u64,
}

/// Count catalog rows on the backend
pub async fn catalog_counts(client: &BackendClient) -> Result<CatalogCounts> {
    Ok(CatalogCounts {
        anime: client.count_rows("anime").await?,
        manga: client.count_rows("manga").await?,
    })
}
