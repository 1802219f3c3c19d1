use crate::error::{AppError, Result};

/// Crowd-ratio move (percentage points) between two snapshots that raises a swing alert.
pub const SWING_ALERT_THRESHOLD_PERCENT: i64 = 10;

/// Snapshots fetched per market for swing detection on list/stake reads.
pub const SWING_SNAPSHOT_LIMIT: i64 = 2;

/// Recent snapshots returned by the market detail endpoint.
pub const DETAIL_SNAPSHOT_LIMIT: i64 = 20;

/// Recent score samples returned by the market detail endpoint.
pub const DETAIL_SERIES_LIMIT: i64 = 12;

/// Max markets settled per /cron/resolve invocation.
pub const RESOLVE_BATCH_LIMIT: i64 = 50;

/// Max markets settled during the resolve phase of /cron/rollover.
pub const ROLLOVER_RESOLVE_LIMIT: i64 = 100;

/// Score-sample lookback window for category selection (hours).
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Categories opened per top-level group each cycle.
pub const DEFAULT_PER_GROUP_LIMIT: usize = 3;

/// Stake requests allowed per user within the rate-limit window.
pub const STAKE_RATE_LIMIT_MAX: usize = 10;

/// Stake rate-limit window (seconds).
pub const STAKE_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Best-effort dedupe window for rapid repeat rollover triggers (seconds).
/// The store-level market_key upsert remains the authoritative guard.
pub const ROLLOVER_COOLDOWN_SECS: u64 = 30;

/// Markets returned per board query before per-category dedupe.
pub const MARKET_LIST_LIMIT: i64 = 30;

pub const LEADERBOARD_DEFAULT_LIMIT: i64 = 20;
pub const LEADERBOARD_MAX_LIMIT: i64 = 50;

/// Row caps for the leaderboard scans (stats table, period ledger window).
pub const LEADERBOARD_STATS_SCAN_LIMIT: i64 = 500;
pub const LEADERBOARD_LEDGER_SCAN_LIMIT: i64 = 20_000;

/// Initial rating for a user's first resolved market.
pub const DEFAULT_RATING: i64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub api_port: u16,
    pub log_level: String,
    /// Points locked per stake request (MARKET_STAKE_POINTS).
    pub stake_points: i64,
    /// Balance seeded into a wallet on first access (MARKET_WALLET_SEED).
    pub wallet_seed_points: i64,
    /// Hours a market accepts positions after opening (MARKET_VOTING_HOURS).
    pub voting_hours: i64,
    /// Hours between lock and resolve (MARKET_COOLDOWN_HOURS).
    pub cooldown_hours: i64,
    /// Shared secret for the cron endpoints (CRON_SECRET). None disables them.
    pub cron_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cooldown_hours =
            parse_positive_i64(std::env::var("MARKET_COOLDOWN_HOURS").ok()).unwrap_or(1);

        // MARKET_WINDOW_HOURS is the legacy knob for the total cycle length;
        // voting hours derive from it when MARKET_VOTING_HOURS is unset.
        let voting_hours = parse_positive_i64(std::env::var("MARKET_VOTING_HOURS").ok())
            .or_else(|| {
                parse_positive_i64(std::env::var("MARKET_WINDOW_HOURS").ok())
                    .map(|window| (window - cooldown_hours).max(1))
            })
            .unwrap_or(23);

        Ok(Self {
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "crowdpulse.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            stake_points: parse_positive_i64(std::env::var("MARKET_STAKE_POINTS").ok())
                .unwrap_or(100),
            wallet_seed_points: parse_positive_i64(std::env::var("MARKET_WALLET_SEED").ok())
                .unwrap_or(1000),
            voting_hours,
            cooldown_hours,
            cron_secret: std::env::var("CRON_SECRET").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Full market cycle: voting window plus the settle cooldown.
    pub fn cycle_hours(&self) -> i64 {
        self.voting_hours + self.cooldown_hours
    }
}

fn parse_positive_i64(value: Option<String>) -> Option<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_parse_rejects_zero_and_garbage() {
        assert_eq!(parse_positive_i64(Some("12".to_string())), Some(12));
        assert_eq!(parse_positive_i64(Some("0".to_string())), None);
        assert_eq!(parse_positive_i64(Some("-3".to_string())), None);
        assert_eq!(parse_positive_i64(Some("abc".to_string())), None);
        assert_eq!(parse_positive_i64(None), None);
    }
}
