//! Error types and Result alias for the Otakudex core

use crate::models::{BoxType, RewardTier};
use thiserror::Error;

/// Main error type shared by every Otakudex crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("No {0} box left to open")]
    InsufficientInventory(BoxType),

    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    /// Catalog has no entry for the drawn tier. A data bug, never substituted.
    #[error("Reward pool for tier {0} is empty")]
    EmptyPool(RewardTier),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Session token expired")]
    TokenExpired,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Reward {name} is not owned by {user_id}")]
    NotOwned { user_id: String, name: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a failed remote call may be replayed later unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::Timeout(_) | Error::TokenExpired
        )
    }

    /// Whether the failure should be shown to the user as blocking feedback
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InsufficientInventory(_)
                | Error::InsufficientFunds { .. }
                | Error::NotOwned { .. }
                | Error::RemoteRejected { .. }
        )
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
