pub mod models;

use sqlx::SqlitePool;
use tracing::warn;

/// Tables the market endpoints depend on. Probed once at startup so
/// "not provisioned yet" is a typed state instead of a per-request
/// error-message sniff.
const REQUIRED_TABLES: &[&str] = &[
    "markets",
    "positions",
    "wallets",
    "ledger",
    "snapshots",
    "user_stats",
];

/// True when every required table exists. Failure to probe counts as
/// not ready — the caller degrades to 503 rather than crashing.
pub async fn schema_ready(pool: &SqlitePool) -> bool {
    for table in REQUIRED_TABLES {
        let exists: Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_optional(pool)
        .await;

        match exists {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("schema probe: table {table} is missing");
                return false;
            }
            Err(e) => {
                warn!("schema probe failed: {e}");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
