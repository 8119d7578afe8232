use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE, RETRY_AFTER},
    HeaderName, HeaderValue, Method,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::AppConfig;

const USER_HEADER: &str = "x-user-id";

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(USER_HEADER),
        ])
        // Report downloads read Content-Disposition.
        .expose_headers([CONTENT_DISPOSITION, RETRY_AFTER]);

    match allowed_origins(&config.cors_origins) {
        None => layer.allow_origin(Any),
        Some(origins) => layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true),
    }
}

/// `None` means any origin (`*` was listed).
fn allowed_origins(configured: &[String]) -> Option<Vec<HeaderValue>> {
    if configured.iter().any(|origin| origin.trim() == "*") {
        return None;
    }
    Some(
        configured
            .iter()
            .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring malformed CORS origin");
                    None
                }
            })
            .collect(),
    )
}
