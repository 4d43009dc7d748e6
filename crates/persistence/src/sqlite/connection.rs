//! Database connection and initialization

use otakudex_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database wrapper for SQLite operations
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to database at the given path, creating if necessary
    pub async fn connect(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }

        let path_str = path.to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| Error::DatabaseError(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            // Readers do not block the single writer
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        info!("Database ready at {}", path_str);
        Ok(db)
    }

    /// Connect to in-memory database (for testing)
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_reward_state (
                user_id TEXT PRIMARY KEY,
                total_points INTEGER NOT NULL DEFAULT 0 CHECK (total_points >= 0),
                daily_points INTEGER NOT NULL DEFAULT 0 CHECK (daily_points >= 0),
                daily_reset_on TEXT,
                login_streak INTEGER NOT NULL DEFAULT 0,
                last_login_on TEXT,
                current_name TEXT NOT NULL,
                current_tier TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                archived_at TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS owned_boxes (
                user_id TEXT NOT NULL,
                box_type TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0),
                PRIMARY KEY (user_id, box_type),
                FOREIGN KEY (user_id) REFERENCES user_reward_state(user_id)
            );

            CREATE TABLE IF NOT EXISTS point_activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                points INTEGER NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES user_reward_state(user_id)
            );

            CREATE TABLE IF NOT EXISTS reward_catalog (
                name TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                source TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reward_catalog_tier
                ON reward_catalog (tier);

            CREATE TABLE IF NOT EXISTS acquisition_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                tier TEXT NOT NULL,
                source_attribution TEXT,
                box_type TEXT NOT NULL,
                acquired_at_ms INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES user_reward_state(user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_acquisition_user_name
                ON acquisition_history (user_id, name);

            CREATE TABLE IF NOT EXISTS offline_actions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                action_type TEXT NOT NULL,
                target TEXT NOT NULL,
                payload_encrypted BLOB NOT NULL,
                iv BLOB NOT NULL,
                enqueued_at_ms INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'pending',
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_offline_actions_state
                ON offline_actions (state, seq);

            CREATE TABLE IF NOT EXISTS cached_media (
                media_kind TEXT NOT NULL,
                media_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                image_url TEXT,
                synopsis TEXT,
                score REAL,
                details TEXT NOT NULL,
                cached_at_ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                PRIMARY KEY (media_kind, media_id)
            );

            CREATE INDEX IF NOT EXISTS idx_cached_media_recent
                ON cached_media (cached_at_ms DESC, seq DESC);

            CREATE TABLE IF NOT EXISTS search_history (
                query TEXT PRIMARY KEY,
                searched_at_ms INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
