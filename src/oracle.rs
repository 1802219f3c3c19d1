//! Reads over the score table maintained by the external analysis pipeline.
//! This service never writes sentiment scores; it only consumes the latest
//! observation per category.

use sqlx::SqlitePool;

use crate::db::models::ScorePointRow;
use crate::error::Result;

/// Baseline used when a category has no samples yet.
pub const NEUTRAL_SCORE: i64 = 50;

/// Most recent score for a category, if any sample exists.
pub async fn latest_score(pool: &SqlitePool, category: &str) -> Result<Option<i64>> {
    let score: Option<i64> = sqlx::query_scalar(
        "SELECT score FROM sentiment_scores WHERE category = ? ORDER BY analyzed_at DESC LIMIT 1",
    )
    .bind(category)
    .fetch_optional(pool)
    .await?;

    Ok(score)
}

/// Baseline for a newly opened market: the latest score clamped to 0..=100,
/// or the neutral midpoint when the category has never been analyzed.
pub async fn baseline_score(pool: &SqlitePool, category: &str) -> Result<i64> {
    Ok(latest_score(pool, category)
        .await?
        .map(|score| score.clamp(0, 100))
        .unwrap_or(NEUTRAL_SCORE))
}

/// Recent samples for a category, oldest first.
pub async fn recent_series(pool: &SqlitePool, category: &str, limit: i64) -> Result<Vec<ScorePointRow>> {
    let mut rows: Vec<ScorePointRow> = sqlx::query_as(
        r#"
        SELECT analyzed_at, score, label, comment
        FROM sentiment_scores
        WHERE category = ?
        ORDER BY analyzed_at DESC
        LIMIT ?
        "#,
    )
    .bind(category)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.reverse();
    Ok(rows)
}

#[cfg(test)]
pub async fn insert_score(pool: &SqlitePool, category: &str, score: i64, analyzed_at: i64) {
    sqlx::query("INSERT INTO sentiment_scores (category, score, analyzed_at) VALUES (?, ?, ?)")
        .bind(category)
        .bind(score)
        .bind(analyzed_at)
        .execute(pool)
        .await
        .expect("insert score");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn latest_score_picks_most_recent_sample() {
        let pool = test_pool().await;
        insert_score(&pool, "coins", 40, 100).await;
        insert_score(&pool, "coins", 62, 200).await;
        insert_score(&pool, "ai", 90, 300).await;

        assert_eq!(latest_score(&pool, "coins").await.unwrap(), Some(62));
        assert_eq!(latest_score(&pool, "oil").await.unwrap(), None);
    }

    #[tokio::test]
    async fn baseline_defaults_to_neutral_and_clamps() {
        let pool = test_pool().await;
        assert_eq!(baseline_score(&pool, "coins").await.unwrap(), NEUTRAL_SCORE);

        insert_score(&pool, "coins", 140, 100).await;
        assert_eq!(baseline_score(&pool, "coins").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn recent_series_is_oldest_first() {
        let pool = test_pool().await;
        for (score, at) in [(40, 100), (55, 200), (61, 300)] {
            insert_score(&pool, "coins", score, at).await;
        }

        let series = recent_series(&pool, "coins", 2).await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].analyzed_at, 200);
        assert_eq!(series[1].analyzed_at, 300);
    }
}
