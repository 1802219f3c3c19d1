//! Market catalog: per-cycle category selection and idempotent market opening.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::categories::{group_for, CATEGORY_TREE};
use crate::config::Config;
use crate::db::models::ScoreSampleRow;
use crate::error::Result;
use crate::oracle;
use crate::types::market_key;

#[derive(Debug, Clone, Serialize)]
pub struct GroupSelection {
    pub group: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSelection {
    pub since: i64,
    pub by_group: Vec<GroupSelection>,
    pub categories: Vec<String>,
}

/// Ranks categories inside each top-level group by (recent sample count
/// desc, most recent sample desc, declared order asc) and keeps up to
/// `per_group_limit` per group. Groups short on sampled categories are
/// padded deterministically from their declared list, so every group fills
/// its quota whenever it has enough declared members.
pub fn select_categories_for_cycle(
    samples: &[ScoreSampleRow],
    per_group_limit: usize,
) -> Vec<GroupSelection> {
    struct Stat {
        count: i64,
        latest: i64,
    }

    let mut stats: HashMap<&str, Stat> = HashMap::new();
    for sample in samples {
        if group_for(&sample.category).is_none() {
            continue;
        }
        let entry = stats.entry(sample.category.as_str()).or_insert(Stat { count: 0, latest: 0 });
        entry.count += 1;
        entry.latest = entry.latest.max(sample.analyzed_at);
    }

    let mut selection = Vec::with_capacity(CATEGORY_TREE.len());

    for (group, members) in CATEGORY_TREE {
        let mut ranked: Vec<(usize, &str, i64, i64)> = members
            .iter()
            .enumerate()
            .filter_map(|(index, category)| {
                stats
                    .get(category)
                    .filter(|stat| stat.count > 0)
                    .map(|stat| (index, *category, stat.count, stat.latest))
            })
            .collect();

        ranked.sort_by(|left, right| {
            right
                .2
                .cmp(&left.2)
                .then(right.3.cmp(&left.3))
                .then(left.0.cmp(&right.0))
        });

        let mut selected: Vec<String> = ranked
            .iter()
            .take(per_group_limit)
            .map(|(_, category, _, _)| category.to_string())
            .collect();

        if selected.len() < per_group_limit {
            let used: HashSet<String> = selected.iter().cloned().collect();
            for category in *members {
                if selected.len() >= per_group_limit {
                    break;
                }
                if !used.contains(*category) {
                    selected.push(category.to_string());
                }
            }
        }

        selection.push(GroupSelection {
            group: group.to_string(),
            categories: selected,
        });
    }

    selection
}

/// Loads score samples inside the lookback window and runs the per-group
/// selection over them.
pub async fn fetch_cycle_selection(
    pool: &SqlitePool,
    lookback_hours: i64,
    per_group_limit: usize,
    now: i64,
) -> Result<CycleSelection> {
    let since = now - lookback_hours * 3600;

    let samples: Vec<ScoreSampleRow> = sqlx::query_as(
        "SELECT category, analyzed_at FROM sentiment_scores WHERE analyzed_at >= ? ORDER BY analyzed_at DESC",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    let by_group = select_categories_for_cycle(&samples, per_group_limit);
    let categories = by_group
        .iter()
        .flat_map(|group| group.categories.iter().cloned())
        .collect();

    Ok(CycleSelection {
        since,
        by_group,
        categories,
    })
}

/// Opens a market for every category that has no active one. Idempotent:
/// an already-active category is untouched, and the unique `market_key`
/// absorbs concurrent callers racing within the same hour — a conflicting
/// insert is a benign no-op, not an error. Returns the newly opened
/// categories.
pub async fn ensure_open(
    pool: &SqlitePool,
    cfg: &Config,
    categories: &[String],
    now: i64,
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let unique: Vec<&String> = categories.iter().filter(|c| seen.insert(c.as_str())).collect();

    let lock_at = now + cfg.voting_hours * 3600;
    let resolve_at = now + cfg.cycle_hours() * 3600;
    let resolve_rule = serde_json::json!({
        "metric": "sentiment_score",
        "voting_hours": cfg.voting_hours,
        "cooldown_hours": cfg.cooldown_hours,
        "cycle_hours": cfg.cycle_hours(),
        "threshold": 0,
        "mode": "delta",
    })
    .to_string();

    let mut opened = Vec::new();

    for category in unique {
        let active: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM markets WHERE category = ? AND status IN ('open', 'locked') AND resolve_at > ? LIMIT 1",
        )
        .bind(category.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await?;

        if active.is_some() {
            continue;
        }

        let baseline = oracle::baseline_score(pool, category).await?;
        let key = market_key(category, now);
        let title = format!("Will {category} sentiment be higher in {}h?", cfg.voting_hours);

        let inserted = sqlx::query(
            r#"
            INSERT INTO markets (market_key, category, title, status, open_at, lock_at, resolve_at, baseline_score, resolve_rule, created_at)
            VALUES (?, ?, ?, 'open', ?, ?, ?, ?, ?, ?)
            ON CONFLICT (market_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(category.as_str())
        .bind(&title)
        .bind(now)
        .bind(lock_at)
        .bind(resolve_at)
        .bind(baseline)
        .bind(&resolve_rule)
        .bind(now)
        .execute(pool)
        .await?;

        // rows_affected = 0 means a concurrent caller won the key race.
        if inserted.rows_affected() > 0 {
            opened.push(category.clone());
        }
    }

    info!(
        requested = categories.len(),
        opened = opened.len(),
        "market open pass complete"
    );

    Ok(opened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::oracle::insert_score;

    fn sample(category: &str, analyzed_at: i64) -> ScoreSampleRow {
        ScoreSampleRow {
            category: category.to_string(),
            analyzed_at,
        }
    }

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

    fn group<'a>(selection: &'a [GroupSelection], name: &str) -> &'a GroupSelection {
        selection.iter().find(|g| g.group == name).unwrap()
    }

    #[test]
    fn ranks_by_count_then_recency_then_declared_order() {
        let samples = vec![
            sample("coins", 100),
            sample("coins", 200),
            sample("defi", 300),
            sample("wallets", 250),
        ];

        let selection = select_categories_for_cycle(&samples, 2);
        let digital = group(&selection, "digital-assets");
        // coins wins on count; defi beats wallets on recency.
        assert_eq!(digital.categories, vec!["coins", "defi"]);
    }

    #[test]
    fn declared_order_breaks_full_ties() {
        let samples = vec![sample("defi", 100), sample("stablecoins", 100)];
        let selection = select_categories_for_cycle(&samples, 2);
        let digital = group(&selection, "digital-assets");
        // Equal count and recency — stablecoins is declared earlier.
        assert_eq!(digital.categories, vec!["stablecoins", "defi"]);
    }

    #[test]
    fn pads_quota_from_declared_list_without_duplicates() {
        let samples = vec![sample("defi", 100)];
        let selection = select_categories_for_cycle(&samples, 3);
        let digital = group(&selection, "digital-assets");
        // defi sampled, then the first declared members that are not used.
        assert_eq!(digital.categories, vec!["defi", "coins", "stablecoins"]);
    }

    #[test]
    fn group_with_no_samples_pads_in_declared_order() {
        let selection = select_categories_for_cycle(&[], 3);
        let energy = group(&selection, "energy-environment");
        assert_eq!(energy.categories, vec!["power", "gas", "oil"]);
    }

    #[test]
    fn undeclared_categories_are_ignored() {
        let samples = vec![sample("astrology", 500), sample("coins", 100)];
        let selection = select_categories_for_cycle(&samples, 1);
        let digital = group(&selection, "digital-assets");
        assert_eq!(digital.categories, vec!["coins"]);
    }

    #[tokio::test]
    async fn ensure_open_is_idempotent_within_the_hour() {
        let pool = test_pool().await;
        let cfg = test_config();
        let now = 1_700_000_000;
        let categories = vec!["coins".to_string(), "ai".to_string()];

        let first = ensure_open(&pool, &cfg, &categories, now).await.unwrap();
        assert_eq!(first, vec!["coins", "ai"]);

        let second = ensure_open(&pool, &cfg, &categories, now).await.unwrap();
        assert!(second.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn ensure_open_uses_latest_score_as_baseline() {
        let pool = test_pool().await;
        let cfg = test_config();
        insert_score(&pool, "coins", 62, 1_699_999_000).await;

        ensure_open(&pool, &cfg, &["coins".to_string()], 1_700_000_000)
            .await
            .unwrap();

        let baseline: i64 = sqlx::query_scalar("SELECT baseline_score FROM markets WHERE category = 'coins'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(baseline, 62);
    }

    #[tokio::test]
    async fn active_market_blocks_a_new_open_in_a_later_hour() {
        let pool = test_pool().await;
        let cfg = test_config();
        let now = 1_700_000_000;

        ensure_open(&pool, &cfg, &["coins".to_string()], now).await.unwrap();
        // Next hour: key differs, but the first market is still active.
        let later = ensure_open(&pool, &cfg, &["coins".to_string()], now + 3600)
            .await
            .unwrap();
        assert!(later.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn sets_voting_and_cooldown_windows() {
        let pool = test_pool().await;
        let cfg = test_config();
        let now = 1_700_000_000;

        ensure_open(&pool, &cfg, &["coins".to_string()], now).await.unwrap();

        let (lock_at, resolve_at): (i64, i64) =
            sqlx::query_as("SELECT lock_at, resolve_at FROM markets WHERE category = 'coins'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(lock_at, now + 23 * 3600);
        assert_eq!(resolve_at, now + 24 * 3600);
    }
}
