//! Settlement engine: finds due markets, determines outcomes against the
//! score oracle, and distributes the pari-mutuel pool.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::{Config, DEFAULT_RATING};
use crate::db::models::{MarketRow, PositionRow};
use crate::error::Result;
use crate::oracle;
use crate::positions::positions_for_market;
use crate::types::{outcome_from_delta, LedgerEntryType, Outcome};
use crate::wallet;

#[derive(Debug, Clone, Serialize)]
pub struct SettleResult {
    pub market_id: i64,
    pub outcome: Outcome,
    pub resolved_score: Option<i64>,
    pub payouts: i64,
    pub refunds: i64,
    pub participants: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveItem {
    pub ok: bool,
    pub market_id: i64,
    pub outcome: Option<Outcome>,
    pub resolved_score: Option<i64>,
    pub payouts: i64,
    pub refunds: i64,
    pub participants: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveSummary {
    pub results: Vec<ResolveItem>,
    pub resolved_count: usize,
    pub failed_count: usize,
}

/// Settles up to `limit` markets whose resolve time has passed, oldest
/// first. Each market settles independently — one failure is reported in
/// its result slot and never aborts the rest of the batch. Markets already
/// resolved are excluded by the status filter, which is what makes repeat
/// invocations safe.
pub async fn resolve_due(
    pool: &SqlitePool,
    cfg: &Config,
    now: i64,
    limit: i64,
) -> Result<ResolveSummary> {
    let due: Vec<MarketRow> = sqlx::query_as(
        r#"
        SELECT * FROM markets
        WHERE status IN ('open', 'locked') AND resolve_at <= ?
        ORDER BY resolve_at ASC
        LIMIT ?
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(due.len());

    for market in &due {
        match settle(pool, cfg, market, now).await {
            Ok(settled) => {
                info!(
                    market_id = settled.market_id,
                    outcome = %settled.outcome,
                    payouts = settled.payouts,
                    refunds = settled.refunds,
                    "market settled"
                );
                results.push(ResolveItem {
                    ok: true,
                    market_id: settled.market_id,
                    outcome: Some(settled.outcome),
                    resolved_score: settled.resolved_score,
                    payouts: settled.payouts,
                    refunds: settled.refunds,
                    participants: settled.participants,
                    error: None,
                });
            }
            Err(e) => {
                error!(market_id = market.id, "settlement failed: {e}");
                results.push(ResolveItem {
                    ok: false,
                    market_id: market.id,
                    outcome: None,
                    resolved_score: None,
                    payouts: 0,
                    refunds: 0,
                    participants: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let resolved_count = results.iter().filter(|item| item.ok).count();
    let failed_count = results.len() - resolved_count;

    Ok(ResolveSummary {
        results,
        resolved_count,
        failed_count,
    })
}

/// Settles one market. Callers must reach this only through `resolve_due` —
/// the engine assumes the market is still open or locked.
///
/// Outcome policy: the sign of (resolved − baseline) decides the winning
/// side. An unavailable score yields a NaN delta and a flat delta yields
/// zero; both resolve the market as void and refund every stake rather than
/// leaving it pending forever. A directional outcome with an empty winning
/// side is stored as void too. The pool remainder from the floor division
/// is retired from circulation, never redistributed.
pub async fn settle(
    pool: &SqlitePool,
    cfg: &Config,
    market: &MarketRow,
    now: i64,
) -> Result<SettleResult> {
    let positions = positions_for_market(pool, market.id).await?;

    let resolved_score = oracle::latest_score(pool, &market.category).await?;
    let delta = match resolved_score {
        Some(score) => (score - market.baseline_score) as f64,
        None => f64::NAN,
    };
    let outcome = outcome_from_delta(delta);

    if positions.is_empty() {
        mark_resolved(pool, market.id, outcome, resolved_score).await?;
        return Ok(SettleResult {
            market_id: market.id,
            outcome,
            resolved_score,
            payouts: 0,
            refunds: 0,
            participants: 0,
        });
    }

    let total_pool: i64 = positions.iter().map(|p| p.stake_points).sum();
    let participants = positions.len() as i64;

    let winners: Vec<&PositionRow> = match outcome.winning_side() {
        Some(side) => positions
            .iter()
            .filter(|p| p.side() == Some(side))
            .collect(),
        None => Vec::new(),
    };

    if winners.is_empty() {
        let reason = if outcome == Outcome::Void { "void" } else { "no_winner" };
        for position in &positions {
            refund_position(pool, cfg, market.id, position, reason, now).await?;
        }
        // A directional outcome with nobody on the winning side still
        // stores void — the refund must match the recorded outcome.
        mark_resolved(pool, market.id, Outcome::Void, resolved_score).await?;
        return Ok(SettleResult {
            market_id: market.id,
            outcome: Outcome::Void,
            resolved_score,
            payouts: 0,
            refunds: participants,
            participants,
        });
    }

    let payout_per_winner = (total_pool / winners.len() as i64).max(0);
    let winning_count = winners.len() as i64;

    for position in &positions {
        let is_winner = outcome.winning_side() == position.side();
        let payout = if is_winner { payout_per_winner } else { 0 };
        let pnl_delta = payout - position.stake_points;

        // Credit, ledger and stats for one user commit together.
        let mut tx = pool.begin().await?;
        wallet::ensure_wallet(&mut tx, &position.user_id, cfg.wallet_seed_points).await?;
        if payout > 0 {
            let balance_after = wallet::credit(&mut tx, &position.user_id, payout).await?;
            let meta = serde_json::json!({
                "side": position.side,
                "payout_per_winner": payout_per_winner,
            });
            wallet::append_ledger(
                &mut tx,
                &position.user_id,
                LedgerEntryType::Payout,
                payout,
                balance_after,
                "market",
                market.id,
                &meta,
                now,
            )
            .await?;
        }
        apply_user_stats(&mut tx, &position.user_id, is_winner, pnl_delta).await?;
        tx.commit().await?;
    }

    mark_resolved(pool, market.id, outcome, resolved_score).await?;

    Ok(SettleResult {
        market_id: market.id,
        outcome,
        resolved_score,
        payouts: winning_count,
        refunds: 0,
        participants,
    })
}

async fn refund_position(
    pool: &SqlitePool,
    cfg: &Config,
    market_id: i64,
    position: &PositionRow,
    reason: &str,
    now: i64,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    wallet::ensure_wallet(&mut tx, &position.user_id, cfg.wallet_seed_points).await?;
    let balance_after = wallet::credit(&mut tx, &position.user_id, position.stake_points).await?;
    wallet::append_ledger(
        &mut tx,
        &position.user_id,
        LedgerEntryType::Refund,
        position.stake_points,
        balance_after,
        "market",
        market_id,
        &serde_json::json!({ "reason": reason }),
        now,
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn mark_resolved(
    pool: &SqlitePool,
    market_id: i64,
    outcome: Outcome,
    resolved_score: Option<i64>,
) -> Result<()> {
    sqlx::query("UPDATE markets SET status = 'resolved', outcome = ?, resolved_score = ? WHERE id = ?")
        .bind(outcome.as_str())
        .bind(resolved_score)
        .bind(market_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn apply_user_stats(
    conn: &mut sqlx::SqliteConnection,
    user_id: &str,
    is_win: bool,
    pnl_delta: i64,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO user_stats (user_id, rating) VALUES (?, ?)")
        .bind(user_id)
        .bind(DEFAULT_RATING)
        .execute(&mut *conn)
        .await?;

    let (resolved_count, win_count, total_pnl): (i64, i64, i64) = sqlx::query_as(
        "SELECT resolved_count, win_count, total_pnl FROM user_stats WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let resolved_count = resolved_count + 1;
    let win_count = win_count + i64::from(is_win);
    let total_pnl = total_pnl + pnl_delta;
    let hit_rate = ((win_count as f64 / resolved_count as f64) * 100.0 * 100.0).round() / 100.0;

    sqlx::query(
        "UPDATE user_stats SET resolved_count = ?, win_count = ?, hit_rate = ?, total_pnl = ? WHERE user_id = ?",
    )
    .bind(resolved_count)
    .bind(win_count)
    .bind(hit_rate)
    .bind(total_pnl)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UserStatsRow;
    use crate::db::test_pool;
    use crate::oracle::insert_score;

    fn test_config() -> Config {
        Config {
            db_path: ":memory:".to_string(),
            api_port: 0,
            log_level: "info".to_string(),
            stake_points: 100,
            wallet_seed_points: 1000,
            voting_hours: 23,
            cooldown_hours: 1,
            cron_secret: None,
        }
    }

    async fn insert_market(pool: &SqlitePool, key: &str, baseline: i64, resolve_at: i64) -> MarketRow {
        let id = sqlx::query(
            r#"
            INSERT INTO markets (market_key, category, title, status, open_at, lock_at, resolve_at, baseline_score, created_at)
            VALUES (?, 'coins', 'test', 'open', 0, ?, ?, ?, 0)
            "#,
        )
        .bind(key)
        .bind(resolve_at - 3600)
        .bind(resolve_at)
        .bind(baseline)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid();

        sqlx::query_as("SELECT * FROM markets WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    /// Seeds a wallet that already paid `stake` out of `seed`, plus the
    /// matching position row — the state place_stake leaves behind.
    async fn seed_position(
        pool: &SqlitePool,
        market_id: i64,
        user: &str,
        side: &str,
        stake: i64,
        seed: i64,
    ) {
        sqlx::query("INSERT OR IGNORE INTO wallets (user_id, balance) VALUES (?, ?)")
            .bind(user)
            .bind(seed - stake)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO positions (market_id, user_id, side, stake_points, created_at) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(market_id)
        .bind(user)
        .bind(side)
        .bind(stake)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn balance_of(pool: &SqlitePool, user: &str) -> i64 {
        sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?")
            .bind(user)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn stats_of(pool: &SqlitePool, user: &str) -> UserStatsRow {
        sqlx::query_as("SELECT * FROM user_stats WHERE user_id = ?")
            .bind(user)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn market_state(pool: &SqlitePool, id: i64) -> (String, Option<String>, Option<i64>) {
        sqlx::query_as("SELECT status, outcome, resolved_score FROM markets WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rising_score_pays_winners_evenly() {
        let pool = test_pool().await;
        let cfg = test_config();
        let market = insert_market(&pool, "coins:1", 50, 1000).await;

        // 3 up at 100 each, 2 down at 150 each — pool 600, 3 winners.
        for user in ["u1", "u2", "u3"] {
            seed_position(&pool, market.id, user, "up", 100, 1000).await;
        }
        for user in ["u4", "u5"] {
            seed_position(&pool, market.id, user, "down", 150, 1000).await;
        }
        insert_score(&pool, "coins", 62, 900).await;

        let result = settle(&pool, &cfg, &market, 1000).await.unwrap();

        assert_eq!(result.outcome, Outcome::Up);
        assert_eq!(result.resolved_score, Some(62));
        assert_eq!(result.payouts, 3);
        assert_eq!(result.refunds, 0);
        assert_eq!(result.participants, 5);

        // payout_per_winner = floor(600 / 3) = 200, remainder 0.
        for user in ["u1", "u2", "u3"] {
            assert_eq!(balance_of(&pool, user).await, 1100);
            let stats = stats_of(&pool, user).await;
            assert_eq!(stats.resolved_count, 1);
            assert_eq!(stats.win_count, 1);
            assert_eq!(stats.hit_rate, 100.0);
            assert_eq!(stats.total_pnl, 100);
        }
        for user in ["u4", "u5"] {
            assert_eq!(balance_of(&pool, user).await, 850);
            let stats = stats_of(&pool, user).await;
            assert_eq!(stats.resolved_count, 1);
            assert_eq!(stats.win_count, 0);
            assert_eq!(stats.hit_rate, 0.0);
            assert_eq!(stats.total_pnl, -150);
        }

        let (status, outcome, resolved_score) = market_state(&pool, market.id).await;
        assert_eq!(status, "resolved");
        assert_eq!(outcome.as_deref(), Some("up"));
        assert_eq!(resolved_score, Some(62));
    }

    #[tokio::test]
    async fn flat_delta_voids_and_refunds_exact_stakes() {
        let pool = test_pool().await;
        let cfg = test_config();
        let market = insert_market(&pool, "coins:1", 50, 1000).await;

        for user in ["u1", "u2", "u3"] {
            seed_position(&pool, market.id, user, "up", 100, 1000).await;
        }
        for user in ["u4", "u5"] {
            seed_position(&pool, market.id, user, "down", 150, 1000).await;
        }
        insert_score(&pool, "coins", 50, 900).await;

        let result = settle(&pool, &cfg, &market, 1000).await.unwrap();

        assert_eq!(result.outcome, Outcome::Void);
        assert_eq!(result.refunds, 5);
        assert_eq!(result.payouts, 0);

        // Every participant is made whole: post-settlement balance equals
        // the pre-stake balance.
        for user in ["u1", "u2", "u3", "u4", "u5"] {
            assert_eq!(balance_of(&pool, user).await, 1000);
        }

        // Refund paths do not count toward prediction stats.
        let stats_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_stats")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stats_rows, 0);

        let refund_reasons: Vec<String> =
            sqlx::query_scalar("SELECT meta FROM ledger WHERE entry_type = 'refund'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(refund_reasons.len(), 5);
        assert!(refund_reasons.iter().all(|m| m.contains("\"void\"")));
    }

    #[tokio::test]
    async fn missing_score_voids_the_market() {
        let pool = test_pool().await;
        let cfg = test_config();
        let market = insert_market(&pool, "coins:1", 50, 1000).await;
        seed_position(&pool, market.id, "u1", "up", 100, 1000).await;

        let result = settle(&pool, &cfg, &market, 1000).await.unwrap();

        assert_eq!(result.outcome, Outcome::Void);
        assert_eq!(result.resolved_score, None);
        assert_eq!(balance_of(&pool, "u1").await, 1000);
    }

    #[tokio::test]
    async fn directional_outcome_with_no_winners_is_stored_void() {
        let pool = test_pool().await;
        let cfg = test_config();
        let market = insert_market(&pool, "coins:1", 50, 1000).await;

        // Everyone bet down; the score rose.
        seed_position(&pool, market.id, "u1", "down", 100, 1000).await;
        seed_position(&pool, market.id, "u2", "down", 100, 1000).await;
        insert_score(&pool, "coins", 70, 900).await;

        let result = settle(&pool, &cfg, &market, 1000).await.unwrap();

        assert_eq!(result.outcome, Outcome::Void);
        assert_eq!(result.refunds, 2);
        assert_eq!(balance_of(&pool, "u1").await, 1000);

        let (_, outcome, _) = market_state(&pool, market.id).await;
        assert_eq!(outcome.as_deref(), Some("void"));

        let refund_reasons: Vec<String> =
            sqlx::query_scalar("SELECT meta FROM ledger WHERE entry_type = 'refund'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert!(refund_reasons.iter().all(|m| m.contains("no_winner")));
    }

    #[tokio::test]
    async fn zero_positions_resolves_without_any_money_movement() {
        let pool = test_pool().await;
        let cfg = test_config();
        let market = insert_market(&pool, "coins:1", 50, 1000).await;
        insert_score(&pool, "coins", 30, 900).await;

        let result = settle(&pool, &cfg, &market, 1000).await.unwrap();

        assert_eq!(result.outcome, Outcome::Down);
        assert_eq!(result.payouts, 0);
        assert_eq!(result.refunds, 0);
        assert_eq!(result.participants, 0);

        let ledger_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(ledger_count, 0);

        let (status, outcome, _) = market_state(&pool, market.id).await;
        assert_eq!(status, "resolved");
        assert_eq!(outcome.as_deref(), Some("down"));
    }

    #[tokio::test]
    async fn indivisible_pool_retires_the_remainder() {
        let pool = test_pool().await;
        let cfg = test_config();
        let market = insert_market(&pool, "coins:1", 50, 1000).await;

        for user in ["u1", "u2", "u3"] {
            seed_position(&pool, market.id, user, "up", 100, 1000).await;
        }
        seed_position(&pool, market.id, "u4", "down", 50, 1000).await;
        insert_score(&pool, "coins", 80, 900).await;

        settle(&pool, &cfg, &market, 1000).await.unwrap();

        // Pool 350, 3 winners → 116 each; 2 points leave circulation.
        let payouts: Vec<i64> =
            sqlx::query_scalar("SELECT delta FROM ledger WHERE entry_type = 'payout'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(payouts, vec![116, 116, 116]);
        let paid: i64 = payouts.iter().sum();
        assert_eq!(350 - paid, 350 % 3);
    }

    #[tokio::test]
    async fn resolve_due_settles_only_due_markets_once() {
        let pool = test_pool().await;
        let cfg = test_config();

        let due_a = insert_market(&pool, "coins:1", 50, 500).await;
        let due_b = insert_market(&pool, "coins:2", 50, 400).await;
        let future = insert_market(&pool, "coins:3", 50, 9000).await;
        insert_score(&pool, "coins", 55, 450).await;

        let summary = resolve_due(&pool, &cfg, 1000, 50).await.unwrap();
        assert_eq!(summary.resolved_count, 2);
        assert_eq!(summary.failed_count, 0);
        // Oldest resolve_at settles first.
        assert_eq!(summary.results[0].market_id, due_b.id);
        assert_eq!(summary.results[1].market_id, due_a.id);

        let (status, _, _) = market_state(&pool, future.id).await;
        assert_eq!(status, "open");

        // Second run finds nothing — resolved markets leave the filter.
        let summary = resolve_due(&pool, &cfg, 1000, 50).await.unwrap();
        assert!(summary.results.is_empty());
    }

    #[tokio::test]
    async fn resolve_due_respects_the_batch_limit() {
        let pool = test_pool().await;
        let cfg = test_config();

        insert_market(&pool, "coins:1", 50, 400).await;
        insert_market(&pool, "coins:2", 50, 500).await;
        insert_market(&pool, "coins:3", 50, 600).await;

        let summary = resolve_due(&pool, &cfg, 1000, 2).await.unwrap();
        assert_eq!(summary.results.len(), 2);
    }
}
