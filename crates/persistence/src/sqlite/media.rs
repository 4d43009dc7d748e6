//! Cached media records and search history

use super::{begin_write, from_millis};
use chrono::{DateTime, Utc};
use otakudex_core::{CachedMedia, Error, MediaDetails, MediaId, Result, SearchEntry};
use sqlx::SqlitePool;

#[derive(Debug, sqlx::FromRow)]
struct MediaRow {
    media_kind: String,
    media_id: i64,
    title: String,
    image_url: Option<String>,
    synopsis: Option<String>,
    score: Option<f64>,
    details: String,
    cached_at_ms: i64,
}

impl TryFrom<MediaRow> for CachedMedia {
    type Error = Error;

    fn try_from(row: MediaRow) -> Result<Self> {
        Ok(CachedMedia {
            id: MediaId {
                kind: row.media_kind.parse()?,
                id: row.media_id,
            },
            title: row.title,
            image_url: row.image_url,
            synopsis: row.synopsis,
            score: row.score,
            details: serde_json::from_str::<MediaDetails>(&row.details)?,
            cached_at: from_millis(row.cached_at_ms)?,
        })
    }
}

/// Insert or overwrite a cached record, keeping `media.cached_at` as given
pub async fn upsert_media(pool: &SqlitePool, media: &CachedMedia) -> Result<()> {
    if media.details.kind() != media.id.kind {
        return Err(Error::InvalidData(format!(
            "{} carries {} details",
            media.id,
            media.details.kind().as_str()
        )));
    }
    let details = serde_json::to_string(&media.details)?;

    sqlx::query(
        r#"
        INSERT INTO cached_media
            (media_kind, media_id, title, image_url, synopsis, score, details, cached_at_ms, seq)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM cached_media))
        ON CONFLICT (media_kind, media_id) DO UPDATE SET
            title = excluded.title,
            image_url = excluded.image_url,
            synopsis = excluded.synopsis,
            score = excluded.score,
            details = excluded.details,
            cached_at_ms = excluded.cached_at_ms,
            seq = excluded.seq
        "#,
    )
    .bind(media.id.kind.as_str())
    .bind(media.id.id)
    .bind(&media.title)
    .bind(&media.image_url)
    .bind(&media.synopsis)
    .bind(media.score)
    .bind(details)
    .bind(media.cached_at.timestamp_millis())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Look up a cached record
pub async fn get_media(pool: &SqlitePool, id: MediaId) -> Result<Option<CachedMedia>> {
    let row: Option<MediaRow> = sqlx::query_as(
        r#"
        SELECT media_kind, media_id, title, image_url, synopsis, score, details, cached_at_ms
        FROM cached_media
        WHERE media_kind = ? AND media_id = ?
        "#,
    )
    .bind(id.kind.as_str())
    .bind(id.id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    row.map(CachedMedia::try_from).transpose()
}

/// Most recently cached records first
pub async fn recent_media(pool: &SqlitePool, limit: u32) -> Result<Vec<CachedMedia>> {
    let rows: Vec<MediaRow> = sqlx::query_as(
        r#"
        SELECT media_kind, media_id, title, image_url, synopsis, score, details, cached_at_ms
        FROM cached_media
        ORDER BY cached_at_ms DESC, seq DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    rows.into_iter().map(CachedMedia::try_from).collect()
}

/// Delete records cached strictly before `cutoff`. Returns how many were removed.
pub async fn delete_media_older_than(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM cached_media WHERE cached_at_ms < ?")
        .bind(cutoff.timestamp_millis())
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected())
}

/// Remember a search query, keeping only the newest `keep` distinct queries
pub async fn record_search(
    pool: &SqlitePool,
    query: &str,
    searched_at: DateTime<Utc>,
    keep: u32,
) -> Result<()> {
    let mut tx = begin_write(pool).await?;

    sqlx::query(
        r#"
        INSERT INTO search_history (query, searched_at_ms, seq)
        VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM search_history))
        ON CONFLICT (query) DO UPDATE SET
            searched_at_ms = excluded.searched_at_ms,
            seq = excluded.seq
        "#,
    )
    .bind(query)
    .bind(searched_at.timestamp_millis())
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    sqlx::query(
        r#"
        DELETE FROM search_history
        WHERE query NOT IN (
            SELECT query FROM search_history ORDER BY seq DESC LIMIT ?
        )
        "#,
    )
    .bind(keep)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

/// Newest searches first
pub async fn recent_searches(pool: &SqlitePool, limit: u32) -> Result<Vec<SearchEntry>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT query, searched_at_ms FROM search_history ORDER BY seq DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    rows.into_iter()
        .map(|(query, at)| {
            Ok(SearchEntry {
                query,
                searched_at: from_millis(at)?,
            })
        })
        .collect()
}

/// Forget all searches
pub async fn clear_searches(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM search_history")
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;

    fn frieren(cached_at: DateTime<Utc>) -> CachedMedia {
        CachedMedia {
            id: MediaId::anime(52991),
            title: "Frieren: Beyond Journey's End".to_string(),
            image_url: Some("https://img.example/52991.jpg".to_string()),
            synopsis: Some("An elf mage outlives her party.".to_string()),
            score: Some(9.3),
            details: MediaDetails::Anime {
                episodes: Some(28),
                status: Some("finished".to_string()),
            },
            cached_at,
        }
    }

    fn berserk(cached_at: DateTime<Utc>) -> CachedMedia {
        CachedMedia {
            id: MediaId::manga(2),
            title: "Berserk".to_string(),
            image_url: None,
            synopsis: None,
            score: None,
            details: MediaDetails::Manga {
                chapters: None,
                volumes: Some(42),
                status: Some("publishing".to_string()),
            },
            cached_at,
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let media = frieren(now);

        upsert_media(db.pool(), &media).await.unwrap();
        assert_eq!(get_media(db.pool(), media.id).await.unwrap(), Some(media));
        assert_eq!(get_media(db.pool(), MediaId::manga(52991)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejected() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut media = frieren(Utc::now());
        media.id = MediaId::manga(52991);
        assert!(matches!(upsert_media(db.pool(), &media).await, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_recent_order_and_eviction() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();

        upsert_media(db.pool(), &frieren(now - Duration::days(10))).await.unwrap();
        upsert_media(db.pool(), &berserk(now)).await.unwrap();

        let recent = recent_media(db.pool(), 10).await.unwrap();
        assert_eq!(recent[0].id, MediaId::manga(2));
        assert_eq!(recent[1].id, MediaId::anime(52991));

        let removed = delete_media_older_than(db.pool(), now - Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(get_media(db.pool(), MediaId::anime(52991)).await.unwrap(), None);
        assert_eq!(recent_media(db.pool(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_write_order() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        upsert_media(db.pool(), &frieren(now)).await.unwrap();
        upsert_media(db.pool(), &berserk(now)).await.unwrap();
        upsert_media(db.pool(), &frieren(now)).await.unwrap();

        let recent = recent_media(db.pool(), 1).await.unwrap();
        assert_eq!(recent[0].id, MediaId::anime(52991));
    }

    #[tokio::test]
    async fn test_search_history_dedup_and_cap() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        for q in ["one piece", "bleach", "one piece", "naruto"] {
            record_search(db.pool(), q, now, 2).await.unwrap();
        }

        let searches = recent_searches(db.pool(), 10).await.unwrap();
        let queries: Vec<_> = searches.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["naruto", "one piece"]);

        clear_searches(db.pool()).await.unwrap();
        assert!(recent_searches(db.pool(), 10).await.unwrap().is_empty());
    }
}
