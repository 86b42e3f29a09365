use axum::http::HeaderMap;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Gate for mutating endpoints. Open when no `INTERNAL_API_KEY` is configured,
/// except in production where a missing key is a configuration error.
pub fn require_internal_key(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        if state.config.is_production() {
            return Err(AppError::Dependency(
                "INTERNAL_API_KEY must be set in production.".to_string(),
            ));
        }
        return Ok(());
    };

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if provided.is_empty() {
        return Err(AppError::Unauthorized(format!(
            "Missing {API_KEY_HEADER} header."
        )));
    }
    if provided != expected {
        return Err(AppError::Forbidden("Invalid API key.".to_string()));
    }
    Ok(())
}
