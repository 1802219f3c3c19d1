//! Position book: staking into an open market.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::models::{MarketRow, PositionRow};
use crate::error::{is_unique_violation, AppError, Result};
use crate::types::{LedgerEntryType, MarketStatus, Side};
use crate::wallet;

#[derive(Debug, Clone)]
pub struct StakeReceipt {
    pub stake_points: i64,
    pub position_stake_points: i64,
    pub wallet_balance: i64,
}

/// Locks one stake unit on `side` for `user_id`.
///
/// Debit, position write and ledger append run inside a single transaction:
/// any failure after the debit rolls the whole sequence back, so a rejected
/// stake can never leave the wallet debited without a matching position and
/// ledger row. Ordering inside the transaction is still debit → position →
/// ledger, so the conditional debit gates everything else.
pub async fn place_stake(
    pool: &SqlitePool,
    cfg: &Config,
    market: &MarketRow,
    user_id: &str,
    side: Side,
    now: i64,
) -> Result<StakeReceipt> {
    if market.status() != Some(MarketStatus::Open) || market.lock_at <= now {
        return Err(AppError::MarketClosed);
    }

    let stake = cfg.stake_points;
    let mut tx = pool.begin().await?;

    let existing: Option<PositionRow> = sqlx::query_as(
        "SELECT id, market_id, user_id, side, stake_points, created_at FROM positions WHERE market_id = ? AND user_id = ?",
    )
    .bind(market.id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = &existing {
        if let Some(existing_side) = row.side() {
            if existing_side != side {
                return Err(AppError::SideConflict {
                    existing: existing_side,
                });
            }
        }
    }

    wallet::ensure_wallet(&mut tx, user_id, cfg.wallet_seed_points).await?;

    let Some(balance_after) = wallet::try_debit(&mut tx, user_id, stake).await? else {
        return Err(AppError::InsufficientBalance);
    };

    let position_stake_points = match &existing {
        Some(row) => {
            let next = row.stake_points + stake;
            sqlx::query("UPDATE positions SET stake_points = ? WHERE id = ?")
                .bind(next)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            next
        }
        None => {
            let inserted = sqlx::query(
                "INSERT INTO positions (market_id, user_id, side, stake_points, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(market.id)
            .bind(user_id)
            .bind(side.as_str())
            .bind(stake)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => stake,
                // Someone else inserted between our read and write — a
                // conflict for the caller, not a server failure.
                Err(e) if is_unique_violation(&e) => return Err(AppError::AlreadyParticipated),
                Err(e) => return Err(e.into()),
            }
        }
    };

    let meta = serde_json::json!({
        "side": side,
        "mode": if existing.is_some() { "add" } else { "new" },
    });
    wallet::append_ledger(
        &mut tx,
        user_id,
        LedgerEntryType::StakeLock,
        -stake,
        balance_after,
        "market",
        market.id,
        &meta,
        now,
    )
    .await?;

    tx.commit().await?;

    Ok(StakeReceipt {
        stake_points: stake,
        position_stake_points,
        wallet_balance: balance_after,
    })
}

/// All positions for one market.
pub async fn positions_for_market(pool: &SqlitePool, market_id: i64) -> Result<Vec<PositionRow>> {
    let rows: Vec<PositionRow> = sqlx::query_as(
        "SELECT id, market_id, user_id, side, stake_points, created_at FROM positions WHERE market_id = ? ORDER BY id",
    )
    .bind(market_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
