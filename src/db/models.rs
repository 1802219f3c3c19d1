//! Database row types used by the runtime sqlx queries.

use crate::types::{MarketStatus, Side};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketRow {
    pub id: i64,
    pub market_key: String,
    pub category: String,
    pub title: String,
    pub status: String,
    pub open_at: i64,
    pub lock_at: i64,
    pub resolve_at: i64,
    pub baseline_score: i64,
    pub resolved_score: Option<i64>,
    pub outcome: Option<String>,
    pub resolve_rule: String,
    pub created_at: i64,
}

impl MarketRow {
    pub fn status(&self) -> Option<MarketStatus> {
        MarketStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionRow {
    pub id: i64,
    pub market_id: i64,
    pub user_id: String,
    pub side: String,
    pub stake_points: i64,
    pub created_at: i64,
}

impl PositionRow {
    pub fn side(&self) -> Option<Side> {
        Side::parse(&self.side)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub market_id: i64,
    pub snapshot_at: i64,
    pub up_count: i64,
    pub down_count: i64,
    pub up_points: i64,
    pub down_points: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub id: i64,
    pub user_id: String,
    pub entry_type: String,
    pub delta: i64,
    pub balance_after: i64,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub meta: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserStatsRow {
    pub user_id: String,
    pub resolved_count: i64,
    pub win_count: i64,
    pub hit_rate: f64,
    pub total_pnl: i64,
    pub rating: i64,
}

/// One score sample from the external analysis pipeline.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ScorePointRow {
    pub analyzed_at: i64,
    pub score: i64,
    pub label: Option<String>,
    pub comment: Option<String>,
}

/// Category + sample time pair used by per-cycle category selection.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScoreSampleRow {
    pub category: String,
    pub analyzed_at: i64,
}
