//! Locally queued user mutations awaiting confirmation by the backend

use crate::errors::{Error, Result};
use crate::types::{MediaId, MediaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Mutation kinds that can be recorded while offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddToList,
    UpdateProgress,
    RateTitle,
    WriteReview,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AddToList => "add_to_list",
            ActionType::UpdateProgress => "update_progress",
            ActionType::RateTitle => "rate_title",
            ActionType::WriteReview => "write_review",
        }
    }

    /// Remote procedure that applies this mutation
    pub fn rpc_name(&self) -> &'static str {
        match self {
            ActionType::AddToList => "add_media_to_list",
            ActionType::UpdateProgress => "update_media_progress",
            ActionType::RateTitle => "rate_media",
            ActionType::WriteReview => "submit_review",
        }
    }

    /// Checks the fields this mutation needs besides the target
    fn validate_payload(&self, payload: &Value) -> Result<()> {
        let field_error = |field: &str, expected: &str| {
            Error::InvalidData(format!(
                "{} payload needs '{}' as {}",
                self.as_str(),
                field,
                expected
            ))
        };
        match self {
            ActionType::AddToList => {
                payload
                    .get("status")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| field_error("status", "a non-empty string"))?;
            }
            ActionType::UpdateProgress => {
                payload
                    .get("progress")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| field_error("progress", "a non-negative integer"))?;
            }
            ActionType::RateTitle => {
                payload
                    .get("score")
                    .and_then(Value::as_f64)
                    .filter(|s| (0.0..=10.0).contains(s))
                    .ok_or_else(|| field_error("score", "a number between 0 and 10"))?;
            }
            ActionType::WriteReview => {
                payload
                    .get("body")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| field_error("body", "a non-empty string"))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "add_to_list" => ActionType::AddToList,
            "update_progress" => ActionType::UpdateProgress,
            "rate_title" => ActionType::RateTitle,
            "write_review" => ActionType::WriteReview,
            other => return Err(Error::InvalidData(format!("unknown action type '{}'", other))),
        })
    }
}

/// Lifecycle of a queued action. Confirmed actions are deleted, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    InFlight,
    /// Gave up: retry ceiling reached or the backend rejected it
    Dead,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Pending => "pending",
            ActionState::InFlight => "in_flight",
            ActionState::Dead => "dead",
        }
    }
}

impl FromStr for ActionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => ActionState::Pending,
            "in_flight" => ActionState::InFlight,
            "dead" => ActionState::Dead,
            other => return Err(Error::InvalidData(format!("unknown action state '{}'", other))),
        })
    }
}

/// A user mutation recorded locally until the backend confirms it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
    pub id: String,
    pub action_type: ActionType,
    /// Entity the mutation applies to; replay is FIFO per target
    pub target: MediaId,
    /// Input of the matching remote procedure
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl OfflineAction {
    /// Build an action from a remote mutation payload.
    ///
    /// The payload must carry `media_id` and `media_kind` plus the fields
    /// its action type requires.
    pub fn new(action_type: ActionType, payload: Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::InvalidData(format!(
                "{} payload must be a JSON object",
                action_type
            )));
        }
        let target = Self::target_of(&payload)?;
        action_type.validate_payload(&payload)?;

        Ok(OfflineAction {
            id: uuid::Uuid::new_v4().to_string(),
            action_type,
            target,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        })
    }

    fn target_of(payload: &Value) -> Result<MediaId> {
        let id = payload
            .get("media_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::InvalidData("payload is missing 'media_id'".to_string()))?;
        let kind = payload
            .get("media_kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidData("payload is missing 'media_kind'".to_string()))?
            .parse::<MediaKind>()?;
        Ok(MediaId { kind, id })
    }
}

/// Queued action that will not be retried automatically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub action: OfflineAction,
    pub last_error: String,
}

/// Outcome of one flush of the offline queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    pub confirmed: Vec<String>,
    pub still_pending: Vec<String>,
    pub dead_lettered: Vec<String>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.still_pending.is_empty() && self.dead_lettered.is_empty()
    }
}
