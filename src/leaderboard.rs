//! Ranked standings over prediction stats, with period P&L derived from
//! the ledger.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::{DEFAULT_RATING, LEADERBOARD_LEDGER_SCAN_LIMIT, LEADERBOARD_STATS_SCAN_LIMIT};
use crate::db::models::UserStatsRow;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Weekly,
    Monthly,
    All,
}

impl Period {
    /// Unknown values fall back to the all-time board.
    pub fn parse(value: &str) -> Self {
        match value {
            "weekly" => Period::Weekly,
            "monthly" => Period::Monthly,
            _ => Period::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::All => "all",
        }
    }

    fn since(&self, now: i64) -> Option<i64> {
        match self {
            Period::Weekly => Some(now - 7 * 86_400),
            Period::Monthly => Some(now - 30 * 86_400),
            Period::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: String,
    pub display_name: String,
    pub resolved_count: i64,
    pub win_count: i64,
    pub hit_rate: f64,
    pub total_pnl: i64,
    pub period_pnl: i64,
    pub rating: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    pub period: &'static str,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub mine: Option<LeaderboardEntry>,
}

pub async fn build_leaderboard(
    pool: &SqlitePool,
    period: Period,
    limit: i64,
    viewer: &str,
    now: i64,
) -> Result<Leaderboard> {
    let pnl_by_user = period_pnl(pool, period.since(now)).await?;

    let stats: Vec<UserStatsRow> = sqlx::query_as(
        "SELECT * FROM user_stats ORDER BY total_pnl DESC LIMIT ?",
    )
    .bind(LEADERBOARD_STATS_SCAN_LIMIT)
    .fetch_all(pool)
    .await?;

    let stats_by_user: HashMap<&str, &UserStatsRow> =
        stats.iter().map(|row| (row.user_id.as_str(), row)).collect();

    // Users with stats, users with period ledger activity, and the viewer
    // (who may have neither yet).
    let mut user_ids: HashSet<&str> = stats_by_user.keys().copied().collect();
    user_ids.extend(pnl_by_user.keys().map(String::as_str));
    user_ids.insert(viewer);

    let mut rows: Vec<LeaderboardEntry> = user_ids
        .into_iter()
        .map(|user_id| {
            let stats = stats_by_user.get(user_id);
            LeaderboardEntry {
                rank: 0,
                user_id: user_id.to_string(),
                display_name: mask_identity(user_id),
                resolved_count: stats.map_or(0, |s| s.resolved_count),
                win_count: stats.map_or(0, |s| s.win_count),
                hit_rate: stats.map_or(0.0, |s| s.hit_rate),
                total_pnl: stats.map_or(0, |s| s.total_pnl),
                period_pnl: pnl_by_user.get(user_id).copied().unwrap_or(0),
                rating: stats.map_or(DEFAULT_RATING, |s| s.rating),
            }
        })
        .collect();

    rows.sort_by(|left, right| {
        let (l, r) = match period {
            Period::All => (left.total_pnl, right.total_pnl),
            _ => (left.period_pnl, right.period_pnl),
        };
        r.cmp(&l)
            .then(right.hit_rate.total_cmp(&left.hit_rate))
            .then(left.user_id.cmp(&right.user_id))
    });

    for (index, row) in rows.iter_mut().enumerate() {
        row.rank = index as i64 + 1;
    }

    let mine = rows.iter().find(|row| row.user_id == viewer).cloned();
    rows.truncate(limit.max(1) as usize);

    Ok(Leaderboard {
        period: period.as_str(),
        leaderboard: rows,
        mine,
    })
}

/// Net ledger delta per user inside the period window. Stake locks are
/// negative and payouts/refunds positive, so the sum is realized P&L plus
/// points still locked in unresolved markets.
async fn period_pnl(pool: &SqlitePool, since: Option<i64>) -> Result<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT user_id, SUM(delta)
        FROM ledger
        WHERE entry_type IN ('stake_lock', 'payout', 'refund') AND created_at >= ?
        GROUP BY user_id
        LIMIT ?
        "#,
    )
    .bind(since.unwrap_or(0))
    .bind(LEADERBOARD_LEDGER_SCAN_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Display masking for identity strings: email-shaped ids keep two leading
/// characters and the domain, anything else keeps the first eight.
fn mask_identity(user_id: &str) -> String {
    if let Some((local, domain)) = user_id.split_once('@') {
        let head: Vec<char> = local.chars().take(3).collect();
        return match head.as_slice() {
            [] => format!("***@{domain}"),
            [a] | [a, _] => format!("{a}*@{domain}"),
            [a, b, ..] => format!("{a}{b}***@{domain}"),
        };
    }

    user_id.chars().take(8).collect()
}
