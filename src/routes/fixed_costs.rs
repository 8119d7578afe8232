use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    permissions::{assert_capability, READ_ROLES, WRITE_ROLES},
    repository::table_service::{count_rows, create_row, list_rows},
    routes::{db_pool, page_body},
    schemas::{
        page_window, remove_nulls, serialize_to_map, validate_input, CreateFixedCostInput,
        FixedCostsQuery,
    },
    services::ledger::LineStatus,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/fixed-costs",
        axum::routing::get(list_fixed_costs).post(create_fixed_cost),
    )
}

async fn list_fixed_costs(
    State(state): State<AppState>,
    Query(query): Query<FixedCostsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(status) = query.status.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        filters.insert("status".to_string(), json!(LineStatus::parse(status)?.as_str()));
    }
    let (page, page_size, offset) = page_window(
        query.page,
        query.page_size,
        state.config.default_page_size,
        state.config.max_page_size,
    );

    let items = list_rows(pool, "fixed_costs", Some(&filters), page_size, offset, "due_date", true).await?;
    let total = count_rows(pool, "fixed_costs", Some(&filters)).await?;
    Ok(Json(page_body(items, total, page, page_size)))
}

async fn create_fixed_cost(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateFixedCostInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    if !payload.value.is_finite() || payload.value < 0.0 {
        return Err(AppError::BadRequest(
            "value must be a finite, non-negative amount.".to_string(),
        ));
    }
    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "fixed_costs", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
