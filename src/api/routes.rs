use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::auth;
use crate::api::views::MarketView;
use crate::catalog;
use crate::categories::{all_categories, is_valid_category};
use crate::config::{
    Config, DEFAULT_LOOKBACK_HOURS, DEFAULT_PER_GROUP_LIMIT, DETAIL_SERIES_LIMIT,
    DETAIL_SNAPSHOT_LIMIT, LEADERBOARD_DEFAULT_LIMIT, LEADERBOARD_MAX_LIMIT, MARKET_LIST_LIMIT,
    RESOLVE_BATCH_LIMIT, ROLLOVER_RESOLVE_LIMIT, SWING_ALERT_THRESHOLD_PERCENT,
    SWING_SNAPSHOT_LIMIT,
};
use crate::crowd::{aggregate_markets, build_swing_alert, recent_snapshots, write_snapshot};
use crate::db::models::{MarketRow, ScorePointRow, SnapshotRow};
use crate::error::AppError;
use crate::guard::{CooldownGuard, RateLimiter};
use crate::leaderboard::{build_leaderboard, Leaderboard, Period};
use crate::oracle;
use crate::positions::place_stake;
use crate::settlement::resolve_due;
use crate::types::{now_secs, MarketStatus, Side};
use crate::wallet;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub cfg: Arc<Config>,
    pub stake_guard: Arc<RateLimiter>,
    pub rollover_guard: Arc<CooldownGuard>,
    pub schema_ready: Arc<AtomicBool>,
}

impl ApiState {
    /// Typed schema gate: endpoints touching market tables degrade to a
    /// distinct 503 while the store is unprovisioned.
    fn ensure_schema(&self) -> Result<(), AppError> {
        if self.schema_ready.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(AppError::SchemaUnavailable)
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/markets", get(get_markets))
        .route("/markets/:id", get(get_market_detail))
        .route("/markets/:id/position", post(post_position))
        .route("/cron/resolve", get(cron_resolve).post(cron_resolve))
        .route("/cron/rollover", get(cron_rollover).post(cron_rollover))
        .route("/leaderboard", get(get_leaderboard))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MarketsQuery {
    /// Comma-separated category filter; unset means every declared category.
    pub categories: Option<String>,
    /// Comma-separated status filter; unset means open,locked.
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub period: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct StakeRequest {
    pub side: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct BoardResponse {
    pub stake_points: i64,
    pub wallet_balance: i64,
    pub markets: Vec<MarketView>,
}

#[derive(Serialize)]
pub struct MarketDetailResponse {
    pub stake_points: i64,
    pub wallet_balance: i64,
    pub market: MarketView,
    pub recent_series: Vec<ScorePointRow>,
    pub snapshots: Vec<SnapshotRow>,
}

#[derive(Serialize)]
pub struct StakeResponse {
    pub ok: bool,
    pub stake_points: i64,
    pub position_stake_points: i64,
    pub wallet_balance: i64,
    pub market: MarketView,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub ok: bool,
    pub resolved_count: usize,
    pub failed_count: usize,
    pub results: Vec<crate::settlement::ResolveItem>,
}

#[derive(Serialize)]
pub struct RolloverResponse {
    pub ok: bool,
    pub generated_at: i64,
    pub lookback_hours: i64,
    pub per_group_limit: usize,
    pub target_categories: Vec<String>,
    pub selection_by_group: Vec<catalog::GroupSelection>,
    pub resolved_count: usize,
    pub resolve_failed_count: usize,
    pub resolve_results: Vec<crate::settlement::ResolveItem>,
    pub opened_count: usize,
    pub opened_categories: Vec<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "schema_ready": state.schema_ready.load(Ordering::Relaxed),
    }))
}

async fn get_markets(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<BoardResponse>, AppError> {
    let user_id = auth::require_user(&headers)?;
    state.ensure_schema()?;
    let now = now_secs();

    let categories = normalize_category_list(params.categories.as_deref());
    let statuses = normalize_status_list(params.status.as_deref());

    if categories.is_empty() {
        return Ok(Json(BoardResponse {
            stake_points: state.cfg.stake_points,
            wallet_balance: 0,
            markets: Vec::new(),
        }));
    }

    let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
        sqlx::QueryBuilder::new("SELECT * FROM markets WHERE category IN (");
    let mut separated = builder.separated(", ");
    for category in &categories {
        separated.push_bind(category.clone());
    }
    builder.push(") AND status IN (");
    let mut separated = builder.separated(", ");
    for status in &statuses {
        separated.push_bind(status.as_str());
    }
    builder.push(") ORDER BY resolve_at DESC LIMIT ");
    builder.push_bind(MARKET_LIST_LIMIT);

    let rows: Vec<MarketRow> = builder.build_query_as().fetch_all(&state.pool).await?;

    // One market per category: rows are newest-first, keep the first seen,
    // then present the board soonest-resolving first.
    let mut latest: Vec<MarketRow> = Vec::new();
    for row in rows {
        if !latest.iter().any(|m| m.category == row.category) {
            latest.push(row);
        }
    }
    latest.sort_by_key(|m| m.resolve_at);

    let wallet_balance = {
        let mut conn = state.pool.acquire().await?;
        wallet::ensure_wallet(&mut conn, &user_id, state.cfg.wallet_seed_points).await?
    };

    let market_ids: Vec<i64> = latest.iter().map(|m| m.id).collect();
    let aggregates = aggregate_markets(&state.pool, &market_ids, Some(user_id.as_str())).await?;
    let snapshots = recent_snapshots(&state.pool, &market_ids, SWING_SNAPSHOT_LIMIT).await?;

    let markets = latest
        .iter()
        .map(|market| {
            let aggregate = aggregates.get(&market.id);
            let view = MarketView::build(market, aggregate, now);
            let alert = build_swing_alert(
                view.crowd.up_ratio,
                snapshots.get(&market.id).map(Vec::as_slice).unwrap_or(&[]),
                SWING_ALERT_THRESHOLD_PERCENT,
            );
            view.with_swing_alert(alert)
        })
        .collect();

    Ok(Json(BoardResponse {
        stake_points: state.cfg.stake_points,
        wallet_balance,
        markets,
    }))
}

async fn get_market_detail(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(market_id): Path<i64>,
) -> Result<Json<MarketDetailResponse>, AppError> {
    let user_id = auth::require_user(&headers)?;
    state.ensure_schema()?;
    let now = now_secs();

    let market = fetch_market(&state.pool, market_id).await?;

    let wallet_balance = {
        let mut conn = state.pool.acquire().await?;
        wallet::ensure_wallet(&mut conn, &user_id, state.cfg.wallet_seed_points).await?
    };

    let aggregates = aggregate_markets(&state.pool, &[market.id], Some(user_id.as_str())).await?;
    let recent_series = oracle::recent_series(&state.pool, &market.category, DETAIL_SERIES_LIMIT).await?;
    let snapshot_map = recent_snapshots(&state.pool, &[market.id], DETAIL_SNAPSHOT_LIMIT).await?;
    let mut snapshots = snapshot_map.get(&market.id).cloned().unwrap_or_default();

    let view = MarketView::build(&market, aggregates.get(&market.id), now);
    let alert = build_swing_alert(view.crowd.up_ratio, &snapshots, SWING_ALERT_THRESHOLD_PERCENT);
    let view = view.with_swing_alert(alert);

    // Charts read oldest-first.
    snapshots.reverse();

    Ok(Json(MarketDetailResponse {
        stake_points: state.cfg.stake_points,
        wallet_balance,
        market: view,
        recent_series,
        snapshots,
    }))
}

async fn post_position(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(market_id): Path<i64>,
    Json(body): Json<StakeRequest>,
) -> Result<Json<StakeResponse>, AppError> {
    let user_id = auth::require_user(&headers)?;
    state.ensure_schema()?;

    if !state.stake_guard.check(&user_id) {
        return Err(AppError::RateLimited);
    }

    let side = Side::parse(body.side.trim()).ok_or(AppError::InvalidSide)?;
    let now = now_secs();

    let market = fetch_market(&state.pool, market_id).await?;
    let receipt = place_stake(&state.pool, &state.cfg, &market, &user_id, side, now).await?;

    let aggregates = aggregate_markets(&state.pool, &[market.id], Some(user_id.as_str())).await?;
    let aggregate = aggregates.get(&market.id);

    // Swing compares against the snapshot written before this stake; the
    // fresh aggregate becomes the next snapshot afterwards.
    let snapshot_map = recent_snapshots(&state.pool, &[market.id], 1).await?;
    let view = MarketView::build(&market, aggregate, now);
    let alert = build_swing_alert(
        view.crowd.up_ratio,
        snapshot_map.get(&market.id).map(Vec::as_slice).unwrap_or(&[]),
        SWING_ALERT_THRESHOLD_PERCENT,
    );
    let view = view.with_swing_alert(alert);

    if let Some(aggregate) = aggregate {
        write_snapshot(&state.pool, market.id, aggregate, now).await?;
    }

    Ok(Json(StakeResponse {
        ok: true,
        stake_points: receipt.stake_points,
        position_stake_points: receipt.position_stake_points,
        wallet_balance: receipt.wallet_balance,
        market: view,
    }))
}

async fn cron_resolve(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ResolveResponse>, AppError> {
    auth::require_cron(&headers, state.cfg.cron_secret.as_deref())?;
    state.ensure_schema()?;

    let summary = resolve_due(&state.pool, &state.cfg, now_secs(), RESOLVE_BATCH_LIMIT).await?;

    Ok(Json(ResolveResponse {
        ok: true,
        resolved_count: summary.resolved_count,
        failed_count: summary.failed_count,
        results: summary.results,
    }))
}

async fn cron_rollover(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<RolloverResponse>, AppError> {
    auth::require_cron(&headers, state.cfg.cron_secret.as_deref())?;
    state.ensure_schema()?;

    // Best-effort dedupe of rapid duplicate triggers; every step below is
    // idempotent against the store, so a missed dedupe is harmless.
    if !state.rollover_guard.try_acquire("rollover") {
        return Err(AppError::RateLimited);
    }

    let now = now_secs();
    let resolve_summary = resolve_due(&state.pool, &state.cfg, now, ROLLOVER_RESOLVE_LIMIT).await?;
    let selection =
        catalog::fetch_cycle_selection(&state.pool, DEFAULT_LOOKBACK_HOURS, DEFAULT_PER_GROUP_LIMIT, now)
            .await?;
    let opened = catalog::ensure_open(&state.pool, &state.cfg, &selection.categories, now).await?;

    Ok(Json(RolloverResponse {
        ok: true,
        generated_at: now,
        lookback_hours: DEFAULT_LOOKBACK_HOURS,
        per_group_limit: DEFAULT_PER_GROUP_LIMIT,
        target_categories: selection.categories,
        selection_by_group: selection.by_group,
        resolved_count: resolve_summary.resolved_count,
        resolve_failed_count: resolve_summary.failed_count,
        resolve_results: resolve_summary.results,
        opened_count: opened.len(),
        opened_categories: opened,
    }))
}

async fn get_leaderboard(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<LeaderboardQuery>,
) -> Result<Json<Leaderboard>, AppError> {
    let user_id = auth::require_user(&headers)?;
    state.ensure_schema()?;

    let period = Period::parse(params.period.as_deref().unwrap_or("all"));
    let limit = params
        .limit
        .filter(|l| *l > 0)
        .map(|l| l.min(LEADERBOARD_MAX_LIMIT))
        .unwrap_or(LEADERBOARD_DEFAULT_LIMIT);

    let board = build_leaderboard(&state.pool, period, limit, &user_id, now_secs()).await?;
    Ok(Json(board))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn fetch_market(pool: &sqlx::SqlitePool, market_id: i64) -> Result<MarketRow, AppError> {
    let market: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE id = ?")
        .bind(market_id)
        .fetch_optional(pool)
        .await?;
    market.ok_or(AppError::NotFound)
}

/// Unknown categories are dropped; no filter means the whole declared set.
fn normalize_category_list(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(str::trim)
            .filter(|c| is_valid_category(c))
            .map(String::from)
            .collect(),
        _ => all_categories().into_iter().map(String::from).collect(),
    }
}

/// Unknown statuses are dropped; an empty result falls back to the active
/// set (open, locked).
fn normalize_status_list(raw: Option<&str>) -> Vec<MarketStatus> {
    let parsed: Vec<MarketStatus> = raw
        .unwrap_or_default()
        .split(',')
        .filter_map(|item| MarketStatus::parse(item.trim()))
        .collect();

    if parsed.is_empty() {
        vec![MarketStatus::Open, MarketStatus::Locked]
    } else {
        parsed
    }
}
