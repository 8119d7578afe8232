use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    permissions::{assert_capability, READ_ROLES, WRITE_ROLES},
    repository::{
        directory::{Client, Collaborator},
        table_service::{list_all_rows, search_all, search_rows, update_row},
    },
    routes::{db_pool, page_body, pdf_response, report_options},
    schemas::{PayablePath, PayableStatusInput, ReportSectionsQuery, SearchQuery},
    services::{
        ledger::{Action, LedgerLine, LineStatus},
        linker::{client_directory, client_label, collaborator_directory, resolve_counterparty},
        report::{
            documents::{payables_document, FixedCost, PayableEntry},
            render, report_filename,
        },
        search_filter::{resolve_filter, resolve_sort, Field, Predicate, PAYABLES},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/payables", axum::routing::get(list_payables))
        .route("/payables/report", axum::routing::get(payables_report))
        .route(
            "/payables/{payable_id}/status",
            axum::routing::patch(update_payable_status),
        )
}

async fn list_payables(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let params = query.to_params()?;
    let predicate = resolve_filter(pool, &PAYABLES, &params).await?;
    let sort = resolve_sort(&PAYABLES, query.sort.as_deref(), query.direction.as_deref())?;
    let (page, page_size, offset) =
        query.page_window(state.config.default_page_size, state.config.max_page_size);

    let (rows, total) = search_rows(pool, &PAYABLES, &predicate, sort, page_size, offset).await?;
    let entries = enrich_rows(pool, rows).await?;

    let items = entries
        .into_iter()
        .map(|(entry, decorated)| payable_view(entry, decorated))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(page_body(items, total, page, page_size)))
}

async fn update_payable_status(
    State(state): State<AppState>,
    Path(path): Path<PayablePath>,
    headers: HeaderMap,
    Json(payload): Json<PayableStatusInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    let pool = db_pool(&state)?;

    let paid_at = match payload.status {
        LineStatus::Paid => json!(Utc::now().to_rfc3339()),
        LineStatus::Open => Value::Null,
    };
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(payload.status.as_str()));
    patch.insert("paid_at".to_string(), paid_at);

    let updated = update_row(pool, "payables", &path.payable_id, &patch).await?;
    let line = LedgerLine::from_value(updated)?;
    tracing::info!(
        payable_id = %line.id,
        status = line.status.as_str(),
        user_id = %user_id,
        "Payable status changed"
    );
    Ok(Json(line))
}

async fn payables_report(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Query(sections): Query<ReportSectionsQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    if !sections.include_project_costs && !sections.include_fixed_costs {
        return Err(AppError::BadRequest(
            "Select at least one of include_project_costs or include_fixed_costs.".to_string(),
        ));
    }

    let project = if sections.include_project_costs {
        let params = query.to_params()?;
        let predicate = resolve_filter(pool, &PAYABLES, &params).await?;
        let sort = match query.sort.as_deref() {
            Some(_) => resolve_sort(&PAYABLES, query.sort.as_deref(), query.direction.as_deref())?,
            None => (PAYABLES.default_sort, true),
        };
        Some(load_payable_entries(pool, &predicate, sort).await?)
    } else {
        None
    };

    let fixed = if sections.include_fixed_costs {
        Some(load_fixed_costs(pool, query.status.as_deref()).await?)
    } else {
        None
    };

    let today = state.config.today();
    let document = payables_document(
        "Payables report".to_string(),
        Some(format!("Generated {}", today.format("%d/%m/%Y"))),
        project.as_deref(),
        fixed.as_deref(),
        report_options(&state.config),
    );
    let bytes = render(&document)?;
    tracing::info!(
        user_id = %user_id,
        project_costs = project.as_ref().map_or(0, Vec::len),
        fixed_costs = fixed.as_ref().map_or(0, Vec::len),
        bytes = bytes.len(),
        "Payables report generated"
    );
    pdf_response(bytes, &report_filename("payables", None, today))
}

/// Ledger lines matching `predicate`, labelled for a report.
pub(crate) async fn load_payable_entries(
    pool: &PgPool,
    predicate: &Predicate,
    sort: (Field, bool),
) -> AppResult<Vec<PayableEntry>> {
    let rows = search_all(pool, &PAYABLES, predicate, sort).await?;
    Ok(enrich_rows(pool, rows)
        .await?
        .into_iter()
        .map(|(entry, _)| entry)
        .collect())
}

pub(crate) fn lines_of_action(action_id: &str) -> Predicate {
    Predicate::Equals {
        field: Field::new("p", "action_id"),
        value: action_id.to_string(),
    }
}

/// Which decorations could be applied; a skipped directory leaves its field
/// out of the response instead of reporting "no match".
#[derive(Debug, Clone, Copy)]
struct Decorated {
    counterparty: bool,
    client: bool,
}

async fn enrich_rows(pool: &PgPool, rows: Vec<Value>) -> AppResult<Vec<(PayableEntry, Decorated)>> {
    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let action = embedded_action(&row);
        decoded.push((LedgerLine::from_value(row)?, action));
    }

    let collaborators = collaborator_directory(pool).await.ok();
    let client_ids = decoded
        .iter()
        .filter_map(|(_, action)| action.as_ref().and_then(|action| action.client.clone()))
        .collect::<Vec<_>>();
    let clients = client_directory(pool, &client_ids).await.ok();

    Ok(decoded
        .into_iter()
        .map(|(line, action)| {
            label_line(line, action, collaborators.as_deref(), clients.as_deref())
        })
        .collect())
}

fn label_line(
    line: LedgerLine,
    action: Option<Action>,
    collaborators: Option<&[Collaborator]>,
    clients: Option<&[Client]>,
) -> (PayableEntry, Decorated) {
    let counterparty =
        collaborators.and_then(|directory| resolve_counterparty(&line.kind, directory));
    let client_reference = action.as_ref().and_then(|action| action.client.as_deref());
    let client_name = match clients {
        Some(clients) => client_label(client_reference, clients),
        None => client_reference.map(ToOwned::to_owned),
    };
    let entry = PayableEntry {
        action_name: action.map(|action| action.name).unwrap_or_default(),
        line,
        client_name,
        counterparty,
    };
    let decorated = Decorated {
        counterparty: collaborators.is_some(),
        client: clients.is_some(),
    };
    (entry, decorated)
}

fn embedded_action(row: &Value) -> Option<Action> {
    let action = row.get("action")?.clone();
    serde_json::from_value::<Action>(action)
        .map_err(|error| {
            tracing::warn!(error = %error, "Payable row carries an unreadable action");
        })
        .ok()
}

fn payable_view(entry: PayableEntry, decorated: Decorated) -> AppResult<Value> {
    let mut view = serde_json::to_value(&entry.line)
        .map_err(|error| AppError::Internal(format!("Could not encode payable: {error}")))?;
    if let Some(object) = view.as_object_mut() {
        object.insert("action_name".to_string(), json!(entry.action_name));
        if decorated.client {
            object.insert("client_name".to_string(), json!(entry.client_name));
        }
        if decorated.counterparty {
            object.insert("counterparty".to_string(), json!(entry.counterparty));
        }
    }
    Ok(view)
}

async fn load_fixed_costs(pool: &PgPool, status: Option<&str>) -> AppResult<Vec<FixedCost>> {
    let mut filters = Map::new();
    if let Some(status) = status.map(str::trim).filter(|value| !value.is_empty()) {
        filters.insert(
            "status".to_string(),
            json!(LineStatus::parse(status)?.as_str()),
        );
    }
    let rows = list_all_rows(pool, "fixed_costs", Some(&filters), "due_date", true).await?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<FixedCost>(row)
                .map_err(|error| AppError::Internal(format!("Malformed fixed cost row: {error}")))
        })
        .collect()
}
