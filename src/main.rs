mod api;
mod catalog;
mod categories;
mod config;
mod crowd;
mod db;
mod error;
mod guard;
mod leaderboard;
mod oracle;
mod positions;
mod settlement;
mod types;
mod wallet;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::{
    Config, ROLLOVER_COOLDOWN_SECS, STAKE_RATE_LIMIT_MAX, STAKE_RATE_LIMIT_WINDOW_SECS,
};
use crate::error::Result;
use crate::guard::{CooldownGuard, RateLimiter};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect_with(options)
        .await?;

    // A failed migration is degraded, not fatal: the API stays up and
    // reports the market schema as unavailable.
    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        warn!("Migration failed: {e} — market endpoints will return 503 until the schema exists");
    }

    let ready = db::schema_ready(&pool).await;
    if ready {
        info!("Database ready at {}", cfg.db_path);
    } else {
        warn!("Market schema not provisioned at {} — serving degraded", cfg.db_path);
    }

    if cfg.cron_secret.is_none() {
        warn!("CRON_SECRET not set — /cron/resolve and /cron/rollover will reject all callers");
    }

    // --- HTTP API server ---
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let state = ApiState {
        pool,
        cfg: Arc::new(cfg),
        stake_guard: Arc::new(RateLimiter::new(
            STAKE_RATE_LIMIT_MAX,
            Duration::from_secs(STAKE_RATE_LIMIT_WINDOW_SECS),
        )),
        rollover_guard: Arc::new(CooldownGuard::new(Duration::from_secs(ROLLOVER_COOLDOWN_SECS))),
        schema_ready: Arc::new(AtomicBool::new(ready)),
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
