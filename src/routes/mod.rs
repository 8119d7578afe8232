use axum::{
    body::Body,
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, Response, StatusCode,
    },
    routing::get,
    Router,
};
use serde_json::{json, Value};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    services::report::layout::LayoutOptions,
    state::AppState,
};

pub mod actions;
pub mod fixed_costs;
pub mod health;
pub mod payables;
pub mod receivables;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(actions::router())
        .merge(payables::router())
        .merge(receivables::router())
        .merge(fixed_costs::router())
}

pub(crate) fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

pub(crate) fn page_body(items: Vec<Value>, total: i64, page: i64, page_size: i64) -> Value {
    json!({
        "items": items,
        "total": total,
        "page": page,
        "page_size": page_size,
    })
}

pub(crate) fn report_options(config: &AppConfig) -> LayoutOptions {
    LayoutOptions {
        repeat_headers: config.report_repeat_headers,
        ..LayoutOptions::default()
    }
}

pub(crate) fn pdf_response(bytes: Vec<u8>, filename: &str) -> AppResult<Response<Body>> {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Body::from(bytes))
        .map_err(|error| {
            tracing::error!(error = %error, "Could not build PDF response");
            AppError::Internal("Could not build PDF response.".to_string())
        })?;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|_| AppError::Internal("Invalid report filename.".to_string()))?;
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
    use serde_json::json;

    use super::{page_body, pdf_response};

    #[test]
    fn pdf_responses_are_attachments() {
        let response = pdf_response(b"%PDF-1.5".to_vec(), "payables-20250115.pdf").expect("response");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"payables-20250115.pdf\""
        );
    }

    #[test]
    fn pages_carry_totals() {
        assert_eq!(
            page_body(vec![json!({"id": "a"})], 41, 2, 20),
            json!({"items": [{"id": "a"}], "total": 41, "page": 2, "page_size": 20})
        );
    }
}
