//! SQLite database management

mod connection;
mod ledger;
mod media;
mod offline;
mod rewards;

pub use connection::Database;
pub use ledger::*;
pub use media::*;
pub use offline::*;
pub use rewards::*;

use chrono::{DateTime, NaiveDate, Utc};
use otakudex_core::{Error, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Start a transaction that takes the write lock up front.
///
/// A deferred transaction that reads and then writes can fail with
/// `SQLITE_BUSY` when another connection commits in between; an immediate
/// one waits on the busy timeout instead.
pub(crate) async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))
}

/// Timestamps are stored as epoch milliseconds so ordering is exact
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::DatabaseError(format!("timestamp {} out of range", ms)))
}

pub(crate) fn parse_day(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| Error::DatabaseError(format!("bad date '{}': {}", s, e)))
        })
        .transpose()
}

