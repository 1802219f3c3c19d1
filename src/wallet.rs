//! Per-user point balances and the append-only audit ledger.
//!
//! Every function takes a `SqliteConnection` so callers can compose the
//! balance mutation, the dependent row write, and the ledger append inside
//! one transaction. Balance mutations are single conditional statements —
//! the non-negative invariant is enforced by the store, not by a
//! read-then-write sequence that concurrent stakes could interleave.

use sqlx::SqliteConnection;

use crate::error::Result;
use crate::types::LedgerEntryType;

/// Creates the wallet with the seed balance on first access and returns the
/// current balance either way.
pub async fn ensure_wallet(
    conn: &mut SqliteConnection,
    user_id: &str,
    seed_points: i64,
) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO wallets (user_id, balance) VALUES (?, ?)")
        .bind(user_id)
        .bind(seed_points)
        .execute(&mut *conn)
        .await?;

    let balance: i64 = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(balance)
}

/// Debits `amount` only if the balance stays non-negative. Returns the new
/// balance, or `None` when the wallet cannot cover the debit (no write
/// happens in that case).
pub async fn try_debit(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: i64,
) -> Result<Option<i64>> {
    let result = sqlx::query("UPDATE wallets SET balance = balance - ? WHERE user_id = ? AND balance >= ?")
        .bind(amount)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let balance: i64 = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Some(balance))
}

/// Credits `amount` and returns the new balance.
pub async fn credit(conn: &mut SqliteConnection, user_id: &str, amount: i64) -> Result<i64> {
    sqlx::query("UPDATE wallets SET balance = balance + ? WHERE user_id = ?")
        .bind(amount)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let balance: i64 = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(balance)
}

/// Appends one audit row. `balance_after` must be the wallet snapshot taken
/// immediately after the mutation this entry records.
#[allow(clippy::too_many_arguments)]
pub async fn append_ledger(
    conn: &mut SqliteConnection,
    user_id: &str,
    entry_type: LedgerEntryType,
    delta: i64,
    balance_after: i64,
    ref_type: &str,
    ref_id: i64,
    meta: &serde_json::Value,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger (user_id, entry_type, delta, balance_after, ref_type, ref_id, meta, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(entry_type.as_str())
    .bind(delta)
    .bind(balance_after)
    .bind(ref_type)
    .bind(ref_id.to_string())
    .bind(meta.to_string())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
