use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::types::Side;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("market tables are not provisioned yet; run the pending migrations")]
    SchemaUnavailable,

    #[error("market is closed for new positions")]
    MarketClosed,

    #[error("already positioned on the {existing} side; top-ups must stay on the same side")]
    SideConflict { existing: Side },

    #[error("a position already exists for this market")]
    AlreadyParticipated,

    #[error("insufficient point balance")]
    InsufficientBalance,

    #[error("side must be \"up\" or \"down\"")]
    InvalidSide,

    #[error("not found")]
    NotFound,

    #[error("too many requests; retry shortly")]
    RateLimited,

    #[error("unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        // A missing table after startup (e.g. the store was re-provisioned
        // underneath us) degrades to the same 503 as the startup probe.
        if is_schema_missing(&err) {
            AppError::SchemaUnavailable
        } else {
            AppError::Database(err)
        }
    }
}

/// SQLite reports unprovisioned tables as "no such table: <name>"; Postgres-style
/// stores say "relation ... does not exist". Either signature means the schema
/// is absent rather than the query being wrong.
pub fn is_schema_missing(err: &sqlx::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("no such table")
        || (message.contains("relation") && message.contains("does not exist"))
}

/// Duplicate-key violations are expected races (concurrent market open or
/// position insert) and are mapped to conflict semantics at call sites.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.is_unique_violation() {
            return true;
        }
    }
    err.to_string().to_lowercase().contains("unique constraint failed")
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::SchemaUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MarketClosed | AppError::InsufficientBalance | AppError::InvalidSide => {
                StatusCode::BAD_REQUEST
            }
            AppError::SideConflict { .. } | AppError::AlreadyParticipated => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Json(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({ "error": self.to_string() });
        if let AppError::SideConflict { existing } = &self {
            body["my_position"] = serde_json::json!(existing);
        }

        (status, Json(body)).into_response()
    }
}
