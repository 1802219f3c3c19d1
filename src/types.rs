use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Direction of a staked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(Side::Up),
            "down" => Some(Side::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Up => "up",
            Side::Down => "down",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Locked,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(MarketStatus::Open),
            "locked" => Some(MarketStatus::Locked),
            "resolved" => Some(MarketStatus::Resolved),
            "cancelled" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Locked => "locked",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement outcome. `Void` covers flat score deltas, an unavailable
/// oracle score, and directional outcomes with zero winning positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Up,
    Down,
    Void,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Up => "up",
            Outcome::Down => "down",
            Outcome::Void => "void",
        }
    }

    /// The side that wins under this outcome, if any.
    pub fn winning_side(&self) -> Option<Side> {
        match self {
            Outcome::Up => Some(Side::Up),
            Outcome::Down => Some(Side::Down),
            Outcome::Void => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maps a resolved-vs-baseline score delta to a market outcome.
/// NaN (score unavailable) compares false both ways and falls through to
/// `Void`; an exactly flat delta also voids — "no clear winner, refund
/// everyone" is the settlement policy, not an accident.
pub fn outcome_from_delta(delta: f64) -> Outcome {
    if delta > 0.0 {
        Outcome::Up
    } else if delta < 0.0 {
        Outcome::Down
    } else {
        Outcome::Void
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    StakeLock,
    Payout,
    Refund,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::StakeLock => "stake_lock",
            LedgerEntryType::Payout => "payout",
            LedgerEntryType::Refund => "refund",
        }
    }
}

impl std::fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market key
// ---------------------------------------------------------------------------

/// Unique open-dedup key: one market per (category, wall-clock hour).
/// Two callers racing within the same hour compute the same key and the
/// second insert lands on the unique constraint.
pub fn market_key(category: &str, now: i64) -> String {
    format!("{category}:{}", now / 3600)
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
