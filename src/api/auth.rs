//! Request identity: the authenticated user id arrives from the external
//! auth layer as a header; cron endpoints authenticate with a shared secret.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::{AppError, Result};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub fn require_user(headers: &HeaderMap) -> Result<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .ok_or(AppError::Unauthorized)
}

/// Accepts the secret via the dedicated header or a bearer token.
/// An unset secret disables the cron endpoints entirely.
pub fn require_cron(headers: &HeaderMap, secret: Option<&str>) -> Result<()> {
    let Some(secret) = secret else {
        return Err(AppError::Unauthorized);
    };

    if let Some(value) = headers.get(CRON_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        if secrets_match(value.trim(), secret) {
            return Ok(());
        }
    }

    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let lowered = value.to_lowercase();
        if lowered.starts_with("bearer ") {
            if secrets_match(value[7..].trim(), secret) {
                return Ok(());
            }
        }
    }

    Err(AppError::Unauthorized)
}

/// Folded byte comparison: effort does not depend on where the inputs
/// diverge (length still leaks, which is acceptable for a cron secret).
fn secrets_match(candidate: &str, secret: &str) -> bool {
    let candidate = candidate.as_bytes();
    let secret = secret.as_bytes();
    if candidate.len() != secret.len() {
        return false;
    }
    candidate
        .iter()
        .zip(secret)
        .fold(0u8, |acc, (left, right)| acc | (left ^ right))
        == 0
}
