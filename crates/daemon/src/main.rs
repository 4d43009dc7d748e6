//! Otakudex background service
//!
//! Replays offline mutations, sweeps the media cache and optionally reports
//! catalog sync progress until interrupted.

mod config;
mod state;

use anyhow::{Context, Result};
use config::Config;
use otakudex_engine::{spawn_eviction_sweep, spawn_flush_loop, SyncMonitor};
use state::AppState;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otakudex_daemon=debug,otakudex_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Otakudex daemon");

    if let Err(e) = run().await {
        tracing::error!("FATAL: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load()?;

    // Queued payloads are sealed with a key bound to this machine
    let encryption_key =
        otakudex_persistence::derive_machine_key().context("Failed to derive machine encryption key")?;
    tracing::info!("Encryption key derived from machine fingerprint");

    let state = AppState::init(&config, &encryption_key).await?;
    tracing::info!("Data directory: {}", config.data_dir.display());

    if let Some(path) = &config.catalog_file {
        seed_catalog(&state, path).await?;
    }

    if let Some(user_id) = &config.user_id {
        report_rewards(&state, user_id).await;
    }

    let pending = state.queue.pending_count().await?;
    let dead = state.queue.dead_letters().await?;
    tracing::info!("{} offline actions pending, {} dead-lettered", pending, dead.len());

    let flush = spawn_flush_loop(state.queue.clone(), state.client.clone(), config.flush_interval);
    let eviction = spawn_eviction_sweep(
        state.cache.clone(),
        config.cache_retention,
        config.eviction_interval,
    );

    let monitor = if config.sync_poll.is_zero() {
        None
    } else {
        let handle = SyncMonitor::spawn(state.client.clone(), config.sync_poll);
        let mut progress = handle.subscribe();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let p = *progress.borrow_and_update();
                if p.active {
                    tracing::info!("Catalog sync: {} anime, {} manga", p.anime, p.manga);
                }
            }
        });
        Some(handle)
    };

    let mut reports = state.queue.subscribe();
    tokio::spawn(async move {
        while let Ok(report) = reports.recv().await {
            for id in &report.dead_lettered {
                tracing::warn!("Offline action {} needs attention", id);
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    flush.stop();
    eviction.stop();
    if let Some(handle) = monitor {
        handle.stop();
    }
    state.db.pool().close().await;
    Ok(())
}

/// Log the local and server reward balances. Being offline is not fatal.
async fn report_rewards(state: &AppState, user_id: &str) {
    match state.ledger.summary(user_id).await {
        Ok(local) => tracing::info!(
            "Local rewards for {}: {} points, {}-day streak, {} boxes",
            user_id,
            local.total_points,
            local.login_streak,
            local.owned_boxes.values().sum::<u32>()
        ),
        Err(e) => tracing::debug!("No local rewards for {}: {}", user_id, e),
    }

    match state.remote_rewards.summary(user_id).await {
        Ok(remote) => tracing::info!(
            "Server rewards for {}: {} points, active name {} ({})",
            user_id,
            remote.total_points,
            remote.current_active_name,
            remote.current_active_tier
        ),
        Err(e) => tracing::warn!("Could not fetch server rewards for {}: {}", user_id, e),
    }
}

async fn seed_catalog(state: &AppState, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&raw).context("Catalog file must be a JSON array")?;

    let seeded = state.rewards.seed_catalog(entries).await?;
    tracing::info!("Loaded {} catalog entries from {}", seeded, path.display());
    Ok(())
}
