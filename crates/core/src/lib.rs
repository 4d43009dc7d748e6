//! Otakudex Core - Shared data models, odds table, types, and errors

pub mod errors;
pub mod models;
pub mod odds;
pub mod types;

pub use errors::{Error, Result};
pub use models::*;
pub use odds::TierTable;
pub use types::*;
