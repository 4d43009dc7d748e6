//! Daemon configuration from environment variables

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fmt::Display, str::FromStr};
use tracing::info;

pub struct Config {
    pub backend_url: String,
    pub api_key: String,
    pub session_token: Option<String>,
    /// Signed-in user whose rewards are reported at startup
    pub user_id: Option<String>,
    pub data_dir: PathBuf,
    /// JSON array of catalog entries loaded at startup
    pub catalog_file: Option<PathBuf>,
    pub flush_interval: Duration,
    pub eviction_interval: Duration,
    pub cache_retention: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// Zero disables the sync monitor
    pub sync_poll: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        let retention_days: u64 = try_load("OTAKUDEX_CACHE_RETENTION_DAYS", "7")?;

        Ok(Self {
            backend_url: required("OTAKUDEX_BACKEND_URL")?,
            api_key: required("OTAKUDEX_API_KEY")?,
            session_token: optional("OTAKUDEX_SESSION_TOKEN"),
            user_id: optional("OTAKUDEX_USER_ID"),
            data_dir: optional("OTAKUDEX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            catalog_file: optional("OTAKUDEX_CATALOG_FILE").map(PathBuf::from),
            flush_interval: Duration::from_secs(try_load("OTAKUDEX_FLUSH_INTERVAL_SECS", "30")?),
            eviction_interval: Duration::from_secs(try_load(
                "OTAKUDEX_EVICTION_INTERVAL_SECS",
                "21600",
            )?),
            cache_retention: Duration::from_secs(retention_days.saturating_mul(24 * 3600)),
            request_timeout: Duration::from_millis(try_load("OTAKUDEX_REQUEST_TIMEOUT_MS", "10000")?),
            max_retries: try_load("OTAKUDEX_MAX_RETRIES", "5")?,
            sync_poll: Duration::from_secs(try_load("OTAKUDEX_SYNC_POLL_SECS", "0")?),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("otakudex.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs_next::data_local_dir()
        .map(|p| p.join("Otakudex"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| anyhow!("{key} must be set"))
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value '{raw}'"))
}
