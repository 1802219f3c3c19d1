//! Crowd statistics derived from the position book.

use std::collections::HashMap;

use futures_util::future::try_join_all;
use sqlx::SqlitePool;

use crate::db::models::{PositionRow, SnapshotRow};
use crate::error::Result;
use crate::types::Side;

/// Position-book totals for one market, plus the requesting user's own
/// position when a user id was supplied to the aggregate read.
#[derive(Debug, Clone, Default)]
pub struct MarketAggregate {
    pub up_count: i64,
    pub down_count: i64,
    pub up_points: i64,
    pub down_points: i64,
    pub total_pool: i64,
    pub my_side: Option<Side>,
    pub my_stake_points: i64,
}

impl MarketAggregate {
    pub fn up_ratio(&self) -> i64 {
        ratio_from_points(self.up_points, self.down_points)
    }
}

/// Share of the pool on the up side, as a rounded percentage.
/// An empty pool reads as 50 — neutral, and no division by zero.
pub fn ratio_from_points(up_points: i64, down_points: i64) -> i64 {
    let total = up_points + down_points;
    if total <= 0 {
        return 50;
    }
    clamped_percent(up_points as f64 / total as f64 * 100.0, 50)
}

pub fn clamped_percent(value: f64, fallback: i64) -> i64 {
    if value.is_finite() {
        (value.round() as i64).clamp(0, 100)
    } else {
        fallback
    }
}

/// Sums position rows into per-market aggregates. Every requested market id
/// gets an entry, zeroed when it has no positions.
pub async fn aggregate_markets(
    pool: &SqlitePool,
    market_ids: &[i64],
    user_id: Option<&str>,
) -> Result<HashMap<i64, MarketAggregate>> {
    let mut result: HashMap<i64, MarketAggregate> = market_ids
        .iter()
        .map(|id| (*id, MarketAggregate::default()))
        .collect();

    if market_ids.is_empty() {
        return Ok(result);
    }

    let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
        "SELECT id, market_id, user_id, side, stake_points, created_at FROM positions WHERE market_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in market_ids {
        separated.push_bind(*id);
    }
    builder.push(")");

    let positions: Vec<PositionRow> = builder.build_query_as().fetch_all(pool).await?;

    for position in &positions {
        let Some(bucket) = result.get_mut(&position.market_id) else {
            continue;
        };

        bucket.total_pool += position.stake_points;
        match position.side() {
            Some(Side::Up) => {
                bucket.up_count += 1;
                bucket.up_points += position.stake_points;
            }
            Some(Side::Down) => {
                bucket.down_count += 1;
                bucket.down_points += position.stake_points;
            }
            None => {}
        }

        if user_id == Some(position.user_id.as_str()) {
            bucket.my_side = position.side();
            bucket.my_stake_points = position.stake_points;
        }
    }

    Ok(result)
}

/// Appends one point-in-time copy of a market's aggregate. Written
/// opportunistically whenever an aggregate is computed for a user-facing
/// read; the swing detector compares consecutive rows.
pub async fn write_snapshot(
    pool: &SqlitePool,
    market_id: i64,
    aggregate: &MarketAggregate,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO snapshots (market_id, snapshot_at, up_count, down_count, up_points, down_points)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(market_id)
    .bind(now)
    .bind(aggregate.up_count)
    .bind(aggregate.down_count)
    .bind(aggregate.up_points)
    .bind(aggregate.down_points)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent snapshots per market, newest first. Per-market LIMIT queries
/// run concurrently — this is the highest-fanout read on the board path.
pub async fn recent_snapshots(
    pool: &SqlitePool,
    market_ids: &[i64],
    per_market_limit: i64,
) -> Result<HashMap<i64, Vec<SnapshotRow>>> {
    let limit = per_market_limit.max(1);

    let fetches = market_ids.iter().map(|market_id| {
        let market_id = *market_id;
        async move {
            let rows: Vec<SnapshotRow> = sqlx::query_as(
                r#"
                SELECT id, market_id, snapshot_at, up_count, down_count, up_points, down_points
                FROM snapshots
                WHERE market_id = ?
                ORDER BY snapshot_at DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(market_id)
            .bind(limit)
            .fetch_all(pool)
            .await?;
            Ok::<_, crate::error::AppError>((market_id, rows))
        }
    });

    let per_market = try_join_all(fetches).await?;
    Ok(per_market.into_iter().collect())
}
