use axum::http::{HeaderMap, StatusCode};
use std::env;

/// Validates the provided API key against the expected API key from
/// environment.
///
/// Returns `Ok(())` if the key is valid, or an error if invalid or missing.
pub fn validate_api_key(provided_key: &str) -> Result<(), (StatusCode, &'static str)> {
    let expected_key = env::var("API_KEY").map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "API_KEY not set in environment",
        )
    })?;

    if provided_key == expected_key {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "Invalid API key"))
    }
}

/// Enforces the `x-api-key` header on mutating routes.
///
/// Auth is enabled by setting `API_KEY` in the environment; when it is unset
/// the check is a no-op so development instances stay usable out of the box.
pub fn require_api_key(headers: &HeaderMap) -> Result<(), (StatusCode, &'static str)> {
    if env::var("API_KEY").is_err() {
        return Ok(());
    }

    let provided = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .ok_or((StatusCode::UNAUTHORIZED, "Missing x-api-key header"))?;

    validate_api_key(provided)
}
