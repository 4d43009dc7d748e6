//! Reward catalog, box opening and acquisition history

use super::{begin_write, from_millis};
use chrono::{DateTime, Utc};
use otakudex_core::{
    Acquisition, BoxType, CatalogEntry, Error, Result, RewardResult, RewardSource, RewardTier,
};
use sqlx::SqlitePool;

/// Insert or replace a catalog entry (validated first)
pub async fn upsert_catalog_entry(pool: &SqlitePool, entry: &CatalogEntry) -> Result<()> {
    entry.validate()?;
    let source = serde_json::to_string(&entry.source)?;

    sqlx::query(
        r#"
        INSERT INTO reward_catalog (name, tier, source)
        VALUES (?, ?, ?)
        ON CONFLICT (name) DO UPDATE SET tier = excluded.tier, source = excluded.source
        "#,
    )
    .bind(&entry.name)
    .bind(entry.tier.as_str())
    .bind(source)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

fn catalog_entry_from_row(name: String, tier: String, source: String) -> Result<CatalogEntry> {
    let entry = CatalogEntry {
        name,
        tier: tier.parse()?,
        source: serde_json::from_str::<RewardSource>(&source)?,
    };
    entry.validate()?;
    Ok(entry)
}

/// All catalog entries of one tier, ordered by name
pub async fn catalog_pool(pool: &SqlitePool, tier: RewardTier) -> Result<Vec<CatalogEntry>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT name, tier, source FROM reward_catalog WHERE tier = ? ORDER BY name",
    )
    .bind(tier.as_str())
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    rows.into_iter()
        .map(|(name, tier, source)| catalog_entry_from_row(name, tier, source))
        .collect()
}

/// Consume one box and record the reward, as a single transaction.
///
/// The tier is drawn by the caller. `pick` receives the size of that tier's
/// pool and returns the chosen index. Nothing is written unless every step
/// succeeds:
/// * no box left → `InsufficientInventory`
/// * empty pool → `EmptyPool`, the box is not consumed
pub async fn open_box<F>(
    pool: &SqlitePool,
    user_id: &str,
    box_type: BoxType,
    tier: RewardTier,
    pick: F,
    acquired_at: DateTime<Utc>,
) -> Result<RewardResult>
where
    F: FnOnce(usize) -> usize,
{
    let mut tx = begin_write(pool).await?;

    let active: Option<(Option<String>,)> =
        sqlx::query_as("SELECT archived_at FROM user_reward_state WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
    if !matches!(active, Some((None,))) {
        return Err(Error::UserNotFound(user_id.to_string()));
    }

    // Decrement-if-positive: a second opener sees zero rows affected
    let result = sqlx::query(
        r#"
        UPDATE owned_boxes
        SET quantity = quantity - 1
        WHERE user_id = ? AND box_type = ? AND quantity >= 1
        "#,
    )
    .bind(user_id)
    .bind(box_type.as_str())
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    if result.rows_affected() == 0 {
        return Err(Error::InsufficientInventory(box_type));
    }

    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT name, source FROM reward_catalog WHERE tier = ? ORDER BY name",
    )
    .bind(tier.as_str())
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    if rows.is_empty() {
        return Err(Error::EmptyPool(tier));
    }

    let index = pick(rows.len()).min(rows.len() - 1);
    let (name, source) = &rows[index];
    let source_attribution = serde_json::from_str::<RewardSource>(source)?.attribution();

    let (prior,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM acquisition_history WHERE user_id = ? AND name = ?",
    )
    .bind(user_id)
    .bind(name)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO acquisition_history
            (user_id, name, tier, source_attribution, box_type, acquired_at_ms)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(tier.as_str())
    .bind(&source_attribution)
    .bind(box_type.as_str())
    .bind(acquired_at.timestamp_millis())
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(RewardResult {
        name: name.clone(),
        tier,
        source_attribution,
        is_first_time_acquisition: prior == 0,
    })
}

/// Acquisition history for a user, newest first
pub async fn list_acquisitions(
    pool: &SqlitePool,
    user_id: &str,
    limit: u32,
) -> Result<Vec<Acquisition>> {
    let rows: Vec<(String, String, String, Option<String>, String, i64)> = sqlx::query_as(
        r#"
        SELECT user_id, name, tier, source_attribution, box_type, acquired_at_ms
        FROM acquisition_history
        WHERE user_id = ?
        ORDER BY acquired_at_ms DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    rows.into_iter()
        .map(|(user_id, name, tier, source_attribution, box_type, at)| {
            Ok(Acquisition {
                user_id,
                name,
                tier: tier.parse()?,
                source_attribution,
                box_type: box_type.parse()?,
                acquired_at: from_millis(at)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::{create_user_state, get_user_state, grant_boxes, set_active_name};
    use crate::Database;

    fn character(name: &str, tier: RewardTier, title: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            tier,
            source: RewardSource::Character {
                anime_title: title.to_string(),
                character_id: 1,
            },
        }
    }

    async fn setup() -> Database {
        let db = Database::connect_in_memory().await.unwrap();
        create_user_state(db.pool(), "u1", "Wandering Ronin", RewardTier::Common)
            .await
            .unwrap();
        upsert_catalog_entry(db.pool(), &character("Levi", RewardTier::Epic, "Attack on Titan"))
            .await
            .unwrap();
        upsert_catalog_entry(db.pool(), &character("Mikasa", RewardTier::Epic, "Attack on Titan"))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_open_without_box_changes_nothing() {
        let db = setup().await;
        let err = open_box(db.pool(), "u1", BoxType::Standard, RewardTier::Epic, |_| 0, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientInventory(BoxType::Standard)));
        assert!(list_acquisitions(db.pool(), "u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_consumes_exactly_one_box() {
        let db = setup().await;
        grant_boxes(db.pool(), "u1", BoxType::Standard, 1).await.unwrap();

        let reward = open_box(db.pool(), "u1", BoxType::Standard, RewardTier::Epic, |_| 1, Utc::now())
            .await
            .unwrap();
        assert_eq!(reward.name, "Mikasa");
        assert_eq!(reward.source_attribution.as_deref(), Some("Attack on Titan"));
        assert!(reward.is_first_time_acquisition);

        let second =
            open_box(db.pool(), "u1", BoxType::Standard, RewardTier::Epic, |_| 1, Utc::now()).await;
        assert!(matches!(second, Err(Error::InsufficientInventory(_))));

        let state = get_user_state(db.pool(), "u1", Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.boxes(BoxType::Standard), 0);
    }

    #[tokio::test]
    async fn test_repeat_name_is_not_first_time() {
        let db = setup().await;
        grant_boxes(db.pool(), "u1", BoxType::Premium, 2).await.unwrap();

        let first = open_box(db.pool(), "u1", BoxType::Premium, RewardTier::Epic, |_| 0, Utc::now())
            .await
            .unwrap();
        let second = open_box(db.pool(), "u1", BoxType::Premium, RewardTier::Epic, |_| 0, Utc::now())
            .await
            .unwrap();
        assert!(first.is_first_time_acquisition);
        assert!(!second.is_first_time_acquisition);
        assert_eq!(list_acquisitions(db.pool(), "u1", 10).await.unwrap().len(), 2);

        assert_eq!(set_active_name(db.pool(), "u1", "Levi").await.unwrap(), RewardTier::Epic);
    }

    #[tokio::test]
    async fn test_empty_pool_rolls_back() {
        let db = setup().await;
        grant_boxes(db.pool(), "u1", BoxType::Ultra, 1).await.unwrap();

        let err = open_box(db.pool(), "u1", BoxType::Ultra, RewardTier::God, |_| 0, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyPool(RewardTier::God)));

        let state = get_user_state(db.pool(), "u1", Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.boxes(BoxType::Ultra), 1);
    }

    #[tokio::test]
    async fn test_catalog_pool_filters_by_tier() {
        let db = setup().await;
        upsert_catalog_entry(
            db.pool(),
            &CatalogEntry {
                name: "Moonlit Drifter".to_string(),
                tier: RewardTier::Common,
                source: RewardSource::Generated {
                    method: "wordlist".to_string(),
                },
            },
        )
        .await
        .unwrap();

        let epic = catalog_pool(db.pool(), RewardTier::Epic).await.unwrap();
        assert_eq!(epic.len(), 2);
        let common = catalog_pool(db.pool(), RewardTier::Common).await.unwrap();
        assert_eq!(common.len(), 1);
        assert_eq!(common[0].source.attribution(), None);
    }
}
