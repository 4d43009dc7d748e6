//! Offline action queue storage
//!
//! Rows are ordered by an autoincrement `seq`, which is the enqueue order.
//! Payloads are stored sealed; see `encryption`.

use super::from_millis;
use crate::encryption::{EncryptedPayload, PayloadEncryptor};
use otakudex_core::{ActionState, Error, OfflineAction, Result};
use sqlx::SqlitePool;
use tracing::warn;

/// Queued action as stored, with its position and state
#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub seq: i64,
    pub action: OfflineAction,
    pub state: ActionState,
    pub last_error: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ActionRow {
    seq: i64,
    id: String,
    action_type: String,
    target: String,
    payload_encrypted: Vec<u8>,
    iv: Vec<u8>,
    enqueued_at_ms: i64,
    retry_count: i64,
    state: String,
    last_error: Option<String>,
}

impl ActionRow {
    fn open_payload(&self, encryptor: &PayloadEncryptor) -> Result<serde_json::Value> {
        let sealed = EncryptedPayload::from_parts(self.payload_encrypted.clone(), &self.iv)?;
        encryptor.open_json(&sealed)
    }

    fn into_queued(self, payload: serde_json::Value) -> Result<QueuedAction> {
        Ok(QueuedAction {
            seq: self.seq,
            action: OfflineAction {
                id: self.id,
                action_type: self.action_type.parse()?,
                target: self.target.parse()?,
                payload,
                enqueued_at: from_millis(self.enqueued_at_ms)?,
                retry_count: self.retry_count.max(0) as u32,
            },
            state: self.state.parse()?,
            last_error: self.last_error,
        })
    }

    fn decode(self, encryptor: &PayloadEncryptor) -> Result<QueuedAction> {
        let payload = self.open_payload(encryptor)?;
        self.into_queued(payload)
    }
}

/// Store a new pending action. Returns its sequence number.
pub async fn insert_action(
    pool: &SqlitePool,
    encryptor: &PayloadEncryptor,
    action: &OfflineAction,
) -> Result<i64> {
    let sealed = encryptor.seal_json(&action.payload)?;

    let result = sqlx::query(
        r#"
        INSERT INTO offline_actions
            (id, action_type, target, payload_encrypted, iv, enqueued_at_ms, retry_count, state)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending')
        "#,
    )
    .bind(&action.id)
    .bind(action.action_type.as_str())
    .bind(action.target.to_string())
    .bind(&sealed.ciphertext)
    .bind(&sealed.iv[..])
    .bind(action.enqueued_at.timestamp_millis())
    .bind(i64::from(action.retry_count))
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.last_insert_rowid())
}

/// All actions in a state, in enqueue order.
///
/// A row that cannot be decoded (for example sealed under another key) is
/// moved to `dead` with the reason in `last_error` and skipped, so it never
/// holds up the rows after it. Dead rows whose payload cannot be opened are
/// still listed, with a null payload, so they can be discarded.
pub async fn load_actions(
    pool: &SqlitePool,
    encryptor: &PayloadEncryptor,
    state: ActionState,
) -> Result<Vec<QueuedAction>> {
    let rows: Vec<ActionRow> = sqlx::query_as(
        r#"
        SELECT seq, id, action_type, target, payload_encrypted, iv,
               enqueued_at_ms, retry_count, state, last_error
        FROM offline_actions
        WHERE state = ?
        ORDER BY seq
        "#,
    )
    .bind(state.as_str())
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    let mut actions = Vec::with_capacity(rows.len());
    for row in rows {
        let seq = row.seq;
        let id = row.id.clone();

        let decoded = if state == ActionState::Dead {
            let payload = row.open_payload(encryptor).unwrap_or(serde_json::Value::Null);
            row.into_queued(payload)
        } else {
            row.decode(encryptor)
        };

        match decoded {
            Ok(queued) => actions.push(queued),
            Err(e) if state == ActionState::Dead => {
                warn!("Skipping unreadable dead action #{} {}: {}", seq, id, e);
            }
            Err(e) => {
                warn!("Offline action #{} {} is unreadable, dead-lettering: {}", seq, id, e);
                mark_dead(pool, &id, &format!("unreadable: {}", e)).await?;
            }
        }
    }

    Ok(actions)
}

/// Move a pending action to in-flight. Returns `false` if it was not pending.
pub async fn mark_in_flight(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE offline_actions SET state = 'in_flight' WHERE id = ? AND state = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}

/// Remove a confirmed action
pub async fn delete_action(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM offline_actions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Record a failed replay: bump the retry count and return the action to
/// `pending`, or to `dead` once `max_retries` attempts have failed.
pub async fn record_failure(
    pool: &SqlitePool,
    id: &str,
    error: &str,
    max_retries: u32,
) -> Result<ActionState> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE offline_actions
        SET retry_count = retry_count + 1,
            last_error = ?,
            state = CASE WHEN retry_count + 1 >= ? THEN 'dead' ELSE 'pending' END
        WHERE id = ?
        RETURNING state
        "#,
    )
    .bind(error)
    .bind(i64::from(max_retries))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    match row {
        Some((state,)) => state.parse(),
        None => Err(Error::InvalidData(format!("no queued action {}", id))),
    }
}

/// Move an action straight to the dead-letter state (non-retryable failure)
pub async fn mark_dead(pool: &SqlitePool, id: &str, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE offline_actions
        SET retry_count = retry_count + 1, last_error = ?, state = 'dead'
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Return actions left in flight by an interrupted flush to `pending`
pub async fn reset_in_flight(pool: &SqlitePool) -> Result<u64> {
    let result =
        sqlx::query("UPDATE offline_actions SET state = 'pending' WHERE state = 'in_flight'")
            .execute(pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected())
}

/// Number of actions in a state
pub async fn count_actions(pool: &SqlitePool, state: ActionState) -> Result<u32> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_actions WHERE state = ?")
        .bind(state.as_str())
        .fetch_one(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.0 as u32)
}

/// Delete a dead-lettered action the user chose to give up on
pub async fn delete_dead_action(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM offline_actions WHERE id = ? AND state = 'dead'")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() > 0)
}
