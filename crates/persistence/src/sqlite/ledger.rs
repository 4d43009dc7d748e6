//! Point ledger and box inventory operations
//!
//! Every mutation of points or boxes runs inside a transaction and uses a
//! conditional update, so totals and quantities can never go negative even
//! when several writers race.

use super::{begin_write, parse_day};
use chrono::NaiveDate;
use otakudex_core::{
    ActivityType, BoxType, Error, LoginOutcome, Result, RewardTier, UserRewardState,
};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;

/// Database row for a user's reward state
#[derive(Debug, sqlx::FromRow)]
struct UserStateRow {
    user_id: String,
    total_points: i64,
    daily_points: i64,
    daily_reset_on: Option<String>,
    login_streak: i64,
    current_name: String,
    current_tier: String,
    archived_at: Option<String>,
}

/// Point activity record stored in database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub id: i64,
    pub user_id: String,
    pub activity_type: String,
    pub points: i64,
    pub created_at: Option<String>,
}

/// Create the reward state for a new user.
///
/// Returns `false` when the user already exists (signup replays are harmless).
pub async fn create_user_state(
    pool: &SqlitePool,
    user_id: &str,
    default_name: &str,
    default_tier: RewardTier,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO user_reward_state (user_id, current_name, current_tier)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(default_name)
    .bind(default_tier.as_str())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}

/// Load a user's state with box inventory.
///
/// `today` decides whether the stored daily counter is still current.
pub async fn get_user_state(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> Result<Option<UserRewardState>> {
    let row: Option<UserStateRow> = sqlx::query_as(
        r#"
        SELECT user_id, total_points, daily_points, daily_reset_on, login_streak,
               current_name, current_tier, archived_at
        FROM user_reward_state
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let Some(row) = row else {
        return Ok(None);
    };

    let boxes: Vec<(String, i64)> = sqlx::query_as(
        "SELECT box_type, quantity FROM owned_boxes WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let mut owned_boxes = BTreeMap::new();
    for (box_type, quantity) in boxes {
        owned_boxes.insert(box_type.parse::<BoxType>()?, quantity.max(0) as u32);
    }

    let daily_points = if parse_day(row.daily_reset_on)? == Some(today) {
        row.daily_points
    } else {
        0
    };

    Ok(Some(UserRewardState {
        user_id: row.user_id,
        total_points: row.total_points,
        daily_points,
        login_streak: row.login_streak.max(0) as u32,
        owned_boxes,
        current_active_name: row.current_name,
        current_active_tier: row.current_tier.parse()?,
        archived: row.archived_at.is_some(),
    }))
}

/// Ensure the user exists and is not archived
async fn require_active_user(conn: &mut SqliteConnection, user_id: &str) -> Result<()> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT archived_at FROM user_reward_state WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

    match row {
        Some((None,)) => Ok(()),
        _ => Err(Error::UserNotFound(user_id.to_string())),
    }
}

/// Apply a point delta inside an open transaction.
///
/// Returns `false` without writing if the total would go negative.
async fn apply_points(
    conn: &mut SqliteConnection,
    user_id: &str,
    activity: ActivityType,
    points: i64,
    today: NaiveDate,
) -> Result<bool> {
    let row: Option<(i64, i64, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT total_points, daily_points, daily_reset_on, archived_at
        FROM user_reward_state
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let (total, daily, reset_on) = match row {
        Some((total, daily, reset_on, None)) => (total, daily, reset_on),
        _ => return Err(Error::UserNotFound(user_id.to_string())),
    };

    let new_total = total
        .checked_add(points)
        .ok_or_else(|| Error::InvalidData(format!("point total overflow for {}", user_id)))?;
    if new_total < 0 {
        return Ok(false);
    }

    // Daily counter only tracks what was earned today
    let daily = if parse_day(reset_on)? == Some(today) { daily } else { 0 };
    let new_daily = daily + points.max(0);

    sqlx::query(
        r#"
        UPDATE user_reward_state
        SET total_points = ?, daily_points = ?, daily_reset_on = ?
        WHERE user_id = ?
        "#,
    )
    .bind(new_total)
    .bind(new_daily)
    .bind(today.to_string())
    .bind(user_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    log_activity(conn, user_id, activity, points).await?;
    Ok(true)
}

async fn log_activity(
    conn: &mut SqliteConnection,
    user_id: &str,
    activity: ActivityType,
    points: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO point_activities (user_id, activity_type, points) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(activity.as_str())
        .bind(points)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

/// Add (or, for negative `points`, remove) points for an activity.
///
/// Returns `false` and leaves the ledger untouched if the total would
/// become negative. Retries are not deduplicated.
pub async fn award_points(
    pool: &SqlitePool,
    user_id: &str,
    activity: ActivityType,
    points: i64,
    today: NaiveDate,
) -> Result<bool> {
    let mut tx = begin_write(pool).await?;

    let applied = apply_points(&mut tx, user_id, activity, points, today).await?;
    if !applied {
        return Ok(false);
    }

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(true)
}

/// Spend points on a box: decrements the total and adds one box, atomically
pub async fn spend_points(
    pool: &SqlitePool,
    user_id: &str,
    amount: i64,
    box_type: BoxType,
) -> Result<()> {
    if amount <= 0 {
        return Err(Error::InvalidData(format!(
            "spend amount must be positive, got {}",
            amount
        )));
    }

    let mut tx = begin_write(pool).await?;

    require_active_user(&mut tx, user_id).await?;

    let result = sqlx::query(
        r#"
        UPDATE user_reward_state
        SET total_points = total_points - ?
        WHERE user_id = ? AND total_points >= ?
        "#,
    )
    .bind(amount)
    .bind(user_id)
    .bind(amount)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    if result.rows_affected() == 0 {
        let (available,): (i64,) =
            sqlx::query_as("SELECT total_points FROM user_reward_state WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        return Err(Error::InsufficientFunds {
            required: amount,
            available,
        });
    }

    add_boxes(&mut tx, user_id, box_type, 1).await?;
    log_activity(&mut tx, user_id, ActivityType::BoxPurchase, -amount).await?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

async fn add_boxes(
    conn: &mut SqliteConnection,
    user_id: &str,
    box_type: BoxType,
    quantity: u32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO owned_boxes (user_id, box_type, quantity)
        VALUES (?, ?, ?)
        ON CONFLICT (user_id, box_type) DO UPDATE SET quantity = quantity + excluded.quantity
        "#,
    )
    .bind(user_id)
    .bind(box_type.as_str())
    .bind(i64::from(quantity))
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

/// Grant boxes without spending points (events, compensation)
pub async fn grant_boxes(
    pool: &SqlitePool,
    user_id: &str,
    box_type: BoxType,
    quantity: u32,
) -> Result<()> {
    let mut tx = begin_write(pool).await?;

    require_active_user(&mut tx, user_id).await?;
    add_boxes(&mut tx, user_id, box_type, quantity).await?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

/// Record a login for `today`, maintaining the streak and awarding points once per day
pub async fn record_daily_login(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> Result<LoginOutcome> {
    let mut tx = begin_write(pool).await?;

    require_active_user(&mut tx, user_id).await?;

    let (streak, last_login): (i64, Option<String>) = sqlx::query_as(
        "SELECT login_streak, last_login_on FROM user_reward_state WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let streak = streak.max(0) as u32;
    let last_login = parse_day(last_login)?;

    if last_login == Some(today) {
        return Ok(LoginOutcome {
            login_streak: streak,
            points_awarded: 0,
        });
    }

    let new_streak = match last_login.and_then(|d| d.succ_opt()) {
        Some(next) if next == today => streak + 1,
        _ => 1,
    };

    sqlx::query(
        "UPDATE user_reward_state SET login_streak = ?, last_login_on = ? WHERE user_id = ?",
    )
    .bind(i64::from(new_streak))
    .bind(today.to_string())
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let points = LoginOutcome::points_for_streak(new_streak);
    apply_points(&mut tx, user_id, ActivityType::DailyLogin, points, today).await?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(LoginOutcome {
        login_streak: new_streak,
        points_awarded: points,
    })
}

/// Switch the displayed name to one the user has acquired. Returns its tier.
pub async fn set_active_name(pool: &SqlitePool, user_id: &str, name: &str) -> Result<RewardTier> {
    let mut tx = begin_write(pool).await?;

    require_active_user(&mut tx, user_id).await?;

    let owned: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT tier FROM acquisition_history
        WHERE user_id = ? AND name = ?
        ORDER BY acquired_at_ms DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(name)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let Some((tier,)) = owned else {
        return Err(Error::NotOwned {
            user_id: user_id.to_string(),
            name: name.to_string(),
        });
    };
    let tier: RewardTier = tier.parse()?;

    sqlx::query("UPDATE user_reward_state SET current_name = ?, current_tier = ? WHERE user_id = ?")
        .bind(name)
        .bind(tier.as_str())
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(tier)
}

/// Soft-archive a user; the row is kept but rejects further mutation
pub async fn archive_user_state(pool: &SqlitePool, user_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE user_reward_state
        SET archived_at = CURRENT_TIMESTAMP
        WHERE user_id = ? AND archived_at IS NULL
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    if result.rows_affected() == 0 {
        return Err(Error::UserNotFound(user_id.to_string()));
    }
    Ok(())
}

/// Most recent ledger entries for a user
pub async fn list_activities(
    pool: &SqlitePool,
    user_id: &str,
    limit: u32,
) -> Result<Vec<ActivityRow>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        r#"
        SELECT id, user_id, activity_type, points, created_at
        FROM point_activities
        WHERE user_id = ?
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(rows)
}
