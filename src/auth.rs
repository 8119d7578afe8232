use axum::http::{header::AUTHORIZATION, HeaderMap};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

type HmacSha256 = Hmac<Sha256>;

pub const DEV_USER_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Caller identity for attribution and the capability check.
///
/// When `API_TOKEN` is configured the request must carry it as a bearer
/// token. The acting user comes from `x-user-id`; with dev overrides on, a
/// missing header resolves to [`DEV_USER_ID`].
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if let Some(expected) = state.config.api_token.as_deref() {
        let presented = bearer_token(headers).unwrap_or_default();
        if !token_matches(presented.as_bytes(), expected.as_bytes()) {
            return Err(AppError::Unauthorized(
                "Unauthorized: missing or invalid bearer token.".to_string(),
            ));
        }
    }

    match header_user_id(headers) {
        Some(user_id) => Ok(user_id),
        None if state.config.auth_dev_overrides_enabled() => Ok(DEV_USER_ID.to_string()),
        None => Err(AppError::Unauthorized(
            "Unauthorized: x-user-id header is required.".to_string(),
        )),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

fn header_user_id(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-user-id")?.to_str().ok()?.trim();
    uuid::Uuid::try_parse(raw).ok().map(|id| id.to_string())
}

/// Compares MACs of both tokens keyed by the expected one, so the check
/// runs over fixed-size digests whatever length was presented.
fn token_matches(presented: &[u8], expected: &[u8]) -> bool {
    let digest = |message: &[u8]| {
        HmacSha256::new_from_slice(expected).map(|mut mac| {
            mac.update(message);
            mac
        })
    };
    let (Ok(reference), Ok(candidate)) = (digest(expected), digest(presented)) else {
        return false;
    };
    candidate
        .verify_slice(&reference.finalize().into_bytes())
        .is_ok()
}
