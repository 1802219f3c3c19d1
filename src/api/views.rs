//! Response view models assembled from market rows and crowd aggregates.

use serde::Serialize;

use crate::crowd::{MarketAggregate, SwingAlert};
use crate::db::models::MarketRow;
use crate::types::Side;

#[derive(Debug, Clone, Serialize)]
pub struct CrowdView {
    pub up_count: i64,
    pub down_count: i64,
    pub up_points: i64,
    pub down_points: i64,
    pub total_pool: i64,
    pub up_ratio: i64,
    pub down_ratio: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MyPositionView {
    pub side: Side,
    pub stake_points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketView {
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
    pub resolve_rule: serde_json::Value,
    pub crowd: CrowdView,
    pub my_position: Option<MyPositionView>,
    pub can_vote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing_alert: Option<SwingAlert>,
}

impl MarketView {
    pub fn build(market: &MarketRow, aggregate: Option<&MarketAggregate>, now: i64) -> Self {
        let empty = MarketAggregate::default();
        let aggregate = aggregate.unwrap_or(&empty);
        let up_ratio = aggregate.up_ratio();

        let my_position = aggregate.my_side.map(|side| MyPositionView {
            side,
            stake_points: aggregate.my_stake_points,
        });

        Self {
            id: market.id,
            market_key: market.market_key.clone(),
            category: market.category.clone(),
            title: market.title.clone(),
            status: market.status.clone(),
            open_at: market.open_at,
            lock_at: market.lock_at,
            resolve_at: market.resolve_at,
            baseline_score: market.baseline_score,
            resolved_score: market.resolved_score,
            outcome: market.outcome.clone(),
            resolve_rule: serde_json::from_str(&market.resolve_rule)
                .unwrap_or_else(|_| serde_json::json!({})),
            crowd: CrowdView {
                up_count: aggregate.up_count,
                down_count: aggregate.down_count,
                up_points: aggregate.up_points,
                down_points: aggregate.down_points,
                total_pool: aggregate.total_pool,
                up_ratio,
                down_ratio: 100 - up_ratio,
            },
            my_position,
            can_vote: market.status == "open" && market.lock_at > now,
            swing_alert: None,
        }
    }

    pub fn with_swing_alert(mut self, alert: SwingAlert) -> Self {
        self.swing_alert = Some(alert);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_row(status: &str, lock_at: i64) -> MarketRow {
        MarketRow {
            id: 1,
            market_key: "coins:1".to_string(),
            category: "coins".to_string(),
            title: "test".to_string(),
            status: status.to_string(),
            open_at: 0,
            lock_at,
            resolve_at: lock_at + 3600,
            baseline_score: 50,
            resolved_score: None,
            outcome: None,
            resolve_rule: r#"{"mode":"delta"}"#.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn can_vote_requires_open_status_and_future_lock() {
        assert!(MarketView::build(&market_row("open", 100), None, 50).can_vote);
        assert!(!MarketView::build(&market_row("open", 100), None, 100).can_vote);
        assert!(!MarketView::build(&market_row("locked", 100), None, 50).can_vote);
    }

    #[test]
    fn empty_aggregate_reads_neutral() {
        let view = MarketView::build(&market_row("open", 100), None, 50);
        assert_eq!(view.crowd.up_ratio, 50);
        assert_eq!(view.crowd.down_ratio, 50);
        assert_eq!(view.crowd.total_pool, 0);
        assert!(view.my_position.is_none());
    }

    #[test]
    fn ratios_and_my_position_come_from_the_aggregate() {
        let aggregate = MarketAggregate {
            up_count: 2,
            down_count: 1,
            up_points: 200,
            down_points: 100,
            total_pool: 300,
            my_side: Some(Side::Up),
            my_stake_points: 100,
        };
        let view = MarketView::build(&market_row("open", 100), Some(&aggregate), 50);
        assert_eq!(view.crowd.up_ratio, 67);
        assert_eq!(view.crowd.down_ratio, 33);
        let mine = view.my_position.unwrap();
        assert_eq!(mine.side, Side::Up);
        assert_eq!(mine.stake_points, 100);
    }

    #[test]
    fn malformed_resolve_rule_degrades_to_empty_object() {
        let mut row = market_row("open", 100);
        row.resolve_rule = "not-json".to_string();
        let view = MarketView::build(&row, None, 50);
        assert_eq!(view.resolve_rule, serde_json::json!({}));
    }
}
