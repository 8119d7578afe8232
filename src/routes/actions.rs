use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    permissions::{assert_capability, READ_ROLES, WRITE_ROLES},
    repository::{
        directory::Client,
        table_service::{create_row, get_row, search_rows, update_row},
    },
    routes::{
        db_pool, page_body,
        payables::{lines_of_action, load_payable_entries},
        report_options,
    },
    schemas::{
        remove_nulls, serialize_to_map, validate_input, ActionPath, CreateActionInput, SearchQuery,
        UpdateActionInput,
    },
    services::{
        ledger::{assign_cost_ids, validate_entries, Action},
        ledger_sync::{delete_action_with_lines, sync_ledger_lines, PgLedgerStore},
        linker::{client_directory, resolve_client_name},
        money::format_date_opt,
        report::{documents::payables_document, render, report_filename},
        search_filter::{narrow_staff, resolve_filter, resolve_sort, ACTIONS, PAYABLES},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/actions",
            axum::routing::get(list_actions).post(create_action),
        )
        .route(
            "/actions/{action_id}",
            axum::routing::get(get_action)
                .patch(update_action)
                .delete(delete_action),
        )
        .route(
            "/actions/{action_id}/payables/generate",
            axum::routing::post(generate_payables),
        )
}

async fn list_actions(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let params = query.to_params()?;
    let predicate = resolve_filter(pool, &ACTIONS, &params).await?;
    let sort = resolve_sort(&ACTIONS, query.sort.as_deref(), query.direction.as_deref())?;
    let (page, page_size, offset) =
        query.page_window(state.config.default_page_size, state.config.max_page_size);

    let (rows, total) = search_rows(pool, &ACTIONS, &predicate, sort, page_size, offset).await?;
    let mut actions = rows.into_iter().map(decode_action).collect::<AppResult<Vec<_>>>()?;

    // Staff lists are narrowed to the matching entries, so they are not
    // exhaustive when `q` is set.
    if let Some(text) = params.text() {
        for action in &mut actions {
            action.staff = narrow_staff(std::mem::take(&mut action.staff), text);
        }
    }

    let clients = client_directory(pool, &client_ids(&actions)).await.ok();
    let items = actions
        .iter()
        .map(|action| action_view(action, clients.as_deref()))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(page_body(items, total, page, page_size)))
}

async fn create_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateActionInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut payload = payload;
    validate_entries(&payload.staff, &payload.costs)?;
    assign_cost_ids(&mut payload.costs);

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("created_by".to_string(), Value::String(user_id));

    let action = decode_action(create_row(pool, "actions", &record).await?)?;
    let sync = sync_ledger_lines(&PgLedgerStore::new(pool), &action, state.config.today()).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "action": action, "sync": sync })),
    ))
}

async fn get_action(
    State(state): State<AppState>,
    Path(path): Path<ActionPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let action = decode_action(get_row(pool, "actions", &path.action_id).await?)?;
    let clients = client_directory(pool, &client_ids(std::slice::from_ref(&action)))
        .await
        .ok();
    Ok(Json(action_view(&action, clients.as_deref())?))
}

async fn update_action(
    State(state): State<AppState>,
    Path(path): Path<ActionPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateActionInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let current = decode_action(get_row(pool, "actions", &path.action_id).await?)?;
    let mut patch = payload;
    let staff = patch.staff.take().unwrap_or(current.staff);
    let mut costs = patch.costs.take().unwrap_or(current.costs);
    validate_entries(&staff, &costs)?;
    assign_cost_ids(&mut costs);

    let mut record = remove_nulls(serialize_to_map(&patch));
    record.insert("staff".to_string(), encode(&staff)?);
    record.insert("costs".to_string(), encode(&costs)?);
    record.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

    let action = decode_action(update_row(pool, "actions", &path.action_id, &record).await?)?;
    let sync = sync_ledger_lines(&PgLedgerStore::new(pool), &action, state.config.today()).await;
    tracing::info!(action_id = %action.id, user_id = %user_id, "Action updated");

    Ok(Json(json!({ "action": action, "sync": sync })))
}

async fn delete_action(
    State(state): State<AppState>,
    Path(path): Path<ActionPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    let pool = db_pool(&state)?;

    let removed_lines = delete_action_with_lines(pool, &path.action_id).await?;
    Ok(Json(json!({ "ok": true, "removed_lines": removed_lines })))
}

/// Sync the action's ledger, then render its payables and keep the PDF in
/// the report directory.
async fn generate_payables(
    State(state): State<AppState>,
    Path(path): Path<ActionPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    let pool = db_pool(&state)?;

    let action = decode_action(get_row(pool, "actions", &path.action_id).await?)?;
    let today = state.config.today();
    let sync = sync_ledger_lines(&PgLedgerStore::new(pool), &action, today).await;

    let entries = load_payable_entries(
        pool,
        &lines_of_action(&action.id),
        (PAYABLES.default_sort, true),
    )
    .await?;
    let subtitle = [
        entries.first().and_then(|entry| entry.client_name.clone()),
        action.event.clone(),
        Some(format_date_opt(action.date.or(action.due_date))).filter(|date| !date.is_empty()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" - ");

    let document = payables_document(
        format!("Payables: {}", action.name),
        Some(subtitle).filter(|value| !value.is_empty()),
        Some(entries.as_slice()),
        None,
        report_options(&state.config),
    );
    let bytes = render(&document)?;

    let filename = report_filename("payables", Some(&action.name), today);
    let directory = PathBuf::from(&state.config.report_output_dir);
    tokio::fs::create_dir_all(&directory).await.map_err(|error| {
        tracing::error!(error = %error, dir = %directory.display(), "Could not create report directory");
        AppError::Internal("Could not store the report.".to_string())
    })?;
    let report_path = directory.join(&filename);
    tokio::fs::write(&report_path, &bytes).await.map_err(|error| {
        tracing::error!(error = %error, path = %report_path.display(), "Could not write report");
        AppError::Internal("Could not store the report.".to_string())
    })?;

    tracing::info!(
        action_id = %action.id,
        lines = entries.len(),
        path = %report_path.display(),
        "Payables report stored"
    );
    Ok(Json(json!({
        "sync": sync,
        "report": {
            "path": report_path.display().to_string(),
            "filename": filename,
            "size": bytes.len(),
        },
    })))
}

fn decode_action(row: Value) -> AppResult<Action> {
    serde_json::from_value::<Action>(row)
        .map_err(|error| AppError::Internal(format!("Malformed action row: {error}")))
}

fn encode<T: serde::Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value)
        .map_err(|error| AppError::Internal(format!("Could not encode action: {error}")))
}

fn client_ids(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|action| action.client.clone())
        .collect()
}

/// `clients` is `None` when the directory could not be read; `client_name`
/// is then left out.
fn action_view(action: &Action, clients: Option<&[Client]>) -> AppResult<Value> {
    let mut view = encode(action)?;
    if let (Some(clients), Some(object)) = (clients, view.as_object_mut()) {
        object.insert(
            "client_name".to_string(),
            json!(resolve_client_name(action, clients)),
        );
    }
    Ok(view)
}
