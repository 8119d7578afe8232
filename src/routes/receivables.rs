use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    permissions::{assert_capability, READ_ROLES, WRITE_ROLES},
    repository::{
        directory::Client,
        table_service::{create_row, get_row, map_db_error, search_all, search_rows},
    },
    routes::{db_pool, page_body, pdf_response, report_options},
    schemas::{
        remove_nulls, serialize_to_map, validate_input, CreateReceivableInput, InstallmentPath,
        InstallmentStatusInput, ReceivablePath, SearchQuery,
    },
    services::{
        installments::{
            build_installments, derive_aggregate_status, set_installment_status, Installment,
            Receivable, ReceivableStatus,
        },
        linker::{client_directory, client_label},
        report::{
            documents::{receivables_document, ReceivableEntry},
            render, report_filename,
        },
        search_filter::{resolve_filter, resolve_sort, RECEIVABLES},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/receivables",
            axum::routing::get(list_receivables).post(create_receivable),
        )
        .route("/receivables/report", axum::routing::get(receivables_report))
        .route(
            "/receivables/{receivable_id}",
            axum::routing::get(get_receivable),
        )
        .route(
            "/receivables/{receivable_id}/installments/{number}/status",
            axum::routing::post(set_installment),
        )
}

async fn list_receivables(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let params = query.to_params()?;
    let predicate = resolve_filter(pool, &RECEIVABLES, &params).await?;
    let sort = resolve_sort(&RECEIVABLES, query.sort.as_deref(), query.direction.as_deref())?;
    let (page, page_size, offset) =
        query.page_window(state.config.default_page_size, state.config.max_page_size);

    let (rows, total) =
        search_rows(pool, &RECEIVABLES, &predicate, sort, page_size, offset).await?;
    let receivables = rows
        .into_iter()
        .map(decode_receivable)
        .collect::<AppResult<Vec<_>>>()?;

    let clients = client_directory(pool, &client_ids(&receivables)).await.ok();
    let items = receivables
        .iter()
        .map(|receivable| receivable_view(receivable, clients.as_deref()))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(page_body(items, total, page, page_size)))
}

async fn create_receivable(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateReceivableInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let today = state.config.today();
    let record = receivable_record(&payload, today)?;
    let receivable = decode_receivable(create_row(pool, "receivables", &record).await?)?;
    tracing::info!(
        receivable_id = %receivable.id,
        installments = receivable.installments.len(),
        user_id = %user_id,
        "Receivable created"
    );
    Ok((StatusCode::CREATED, Json(receivable_view(&receivable, None)?)))
}

async fn get_receivable(
    State(state): State<AppState>,
    Path(path): Path<ReceivablePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let receivable = decode_receivable(get_row(pool, "receivables", &path.receivable_id).await?)?;
    let clients = client_directory(pool, &client_ids(std::slice::from_ref(&receivable)))
        .await
        .ok();
    Ok(Json(receivable_view(&receivable, clients.as_deref())?))
}

/// Mark one installment and store the recomputed aggregate. The row is
/// locked for the read-modify-write so concurrent updates to sibling
/// installments are not lost.
async fn set_installment(
    State(state): State<AppState>,
    Path(path): Path<InstallmentPath>,
    headers: HeaderMap,
    Json(payload): Json<InstallmentStatusInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, WRITE_ROLES).await?;
    let pool = db_pool(&state)?;

    let id = uuid::Uuid::try_parse(path.receivable_id.trim())
        .map_err(|_| AppError::NotFound("receivables record not found.".to_string()))?;
    let today = state.config.today();
    let receivable = update_installment(pool, id, path.number, &payload, today).await?;

    tracing::info!(
        receivable_id = %receivable.id,
        installment = path.number,
        status = receivable.status.as_str(),
        user_id = %user_id,
        "Installment status changed"
    );
    Ok(Json(receivable_view(&receivable, None)?))
}

async fn receivables_report(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_capability(&state, &user_id, READ_ROLES).await?;
    let pool = db_pool(&state)?;

    let params = query.to_params()?;
    let predicate = resolve_filter(pool, &RECEIVABLES, &params).await?;
    let sort = match query.sort.as_deref() {
        Some(_) => resolve_sort(&RECEIVABLES, query.sort.as_deref(), query.direction.as_deref())?,
        None => (RECEIVABLES.default_sort, true),
    };
    let receivables = search_all(pool, &RECEIVABLES, &predicate, sort)
        .await?
        .into_iter()
        .map(decode_receivable)
        .collect::<AppResult<Vec<_>>>()?;

    let clients = client_directory(pool, &client_ids(&receivables)).await.ok();
    let entries = receivables
        .into_iter()
        .map(|receivable| ReceivableEntry {
            client_name: clients
                .as_deref()
                .and_then(|clients| client_label(receivable.client_id.as_deref(), clients)),
            receivable,
        })
        .collect::<Vec<_>>();

    let today = state.config.today();
    let document = receivables_document(
        "Receivables report".to_string(),
        Some(format!("Generated {}", today.format("%d/%m/%Y"))),
        &entries,
        report_options(&state.config),
    );
    let bytes = render(&document)?;
    tracing::info!(user_id = %user_id, rows = entries.len(), bytes = bytes.len(), "Receivables report generated");
    pdf_response(bytes, &report_filename("receivables", None, today))
}

/// Row for a new receivable. With `installment_count` the plan decides the
/// status and the last due date; without it the explicit status applies.
fn receivable_record(
    payload: &CreateReceivableInput,
    today: NaiveDate,
) -> AppResult<serde_json::Map<String, Value>> {
    let mut record = remove_nulls(serialize_to_map(payload));
    record.remove("installment_count");
    record.remove("first_due_date");

    let (installments, status) = match payload.installment_count {
        Some(count) => {
            let first_due = payload
                .first_due_date
                .or(payload.due_date)
                .ok_or_else(|| {
                    AppError::BadRequest(
                        "first_due_date is required when installment_count is set.".to_string(),
                    )
                })?;
            let plan = build_installments(payload.total, count, first_due)?;
            let status = derive_aggregate_status(&plan);
            if let Some(last) = plan.last() {
                record.insert("due_date".to_string(), json!(last.due_date));
            }
            (plan, status)
        }
        None => {
            if !payload.total.is_finite() || payload.total < 0.0 {
                return Err(AppError::BadRequest(
                    "total must be a finite, non-negative amount.".to_string(),
                ));
            }
            (Vec::new(), payload.status.unwrap_or(ReceivableStatus::Open))
        }
    };

    if status == ReceivableStatus::Received {
        record.insert("received_date".to_string(), json!(today));
    }
    record.insert("installments".to_string(), json!(installments));
    record.insert("status".to_string(), json!(status.as_str()));
    record
        .entry("document_date".to_string())
        .or_insert_with(|| json!(today));
    Ok(record)
}

async fn update_installment(
    pool: &PgPool,
    id: uuid::Uuid,
    number: u32,
    payload: &InstallmentStatusInput,
    today: NaiveDate,
) -> AppResult<Receivable> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let row = sqlx::query("SELECT row_to_json(t) AS row FROM receivables t WHERE t.id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?
        .and_then(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound("receivables record not found.".to_string()))?;
    let mut receivable = decode_receivable(row)?;

    let paid_date = match payload.status {
        ReceivableStatus::Received => Some(payload.paid_date.unwrap_or(today)),
        ReceivableStatus::Open => None,
    };
    let aggregate =
        set_installment_status(&mut receivable.installments, number, payload.status, paid_date)?;
    let received_date = match aggregate {
        ReceivableStatus::Received => last_paid_date(&receivable.installments).or(Some(today)),
        ReceivableStatus::Open => None,
    };

    let row = sqlx::query(
        "UPDATE receivables SET installments = $1, status = $2, received_date = $3
         WHERE id = $4 RETURNING row_to_json(receivables.*) AS row",
    )
    .bind(json!(receivable.installments))
    .bind(aggregate.as_str())
    .bind(received_date)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?
    .try_get::<Option<Value>, _>("row")
    .ok()
    .flatten()
    .ok_or_else(|| AppError::Internal("Could not update receivable.".to_string()))?;

    tx.commit().await.map_err(map_db_error)?;
    decode_receivable(row)
}

fn last_paid_date(installments: &[Installment]) -> Option<NaiveDate> {
    installments
        .iter()
        .filter_map(|installment| installment.paid_date)
        .max()
}

fn decode_receivable(row: Value) -> AppResult<Receivable> {
    serde_json::from_value::<Receivable>(row)
        .map_err(|error| AppError::Internal(format!("Malformed receivable row: {error}")))
}

fn client_ids(receivables: &[Receivable]) -> Vec<String> {
    receivables
        .iter()
        .filter_map(|receivable| receivable.client_id.clone())
        .collect()
}

fn receivable_view(receivable: &Receivable, clients: Option<&[Client]>) -> AppResult<Value> {
    let mut view = serde_json::to_value(receivable)
        .map_err(|error| AppError::Internal(format!("Could not encode receivable: {error}")))?;
    if let Some(object) = view.as_object_mut() {
        object.insert(
            "effective_status".to_string(),
            json!(receivable.effective_status().as_str()),
        );
        object.insert(
            "received_installments".to_string(),
            json!(receivable.received_count()),
        );
        if let Some(clients) = clients {
            object.insert(
                "client_name".to_string(),
                json!(client_label(receivable.client_id.as_deref(), clients)),
            );
        }
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{decode_receivable, last_paid_date, receivable_record, receivable_view};
    use crate::{
        error::AppError,
        schemas::CreateReceivableInput,
        services::installments::{build_installments, ReceivableStatus},
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).expect("date")
    }

    fn input(extra: serde_json::Value) -> CreateReceivableInput {
        let mut body = json!({
            "client_id": "6f9619ff-8b86-d011-b42d-00cf4fc964ff",
            "action_ids": ["9b2f3c1e-0000-4000-8000-0000000000aa"],
            "description": "Feira",
            "total": 1000
        });
        if let (Some(target), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(body).expect("input")
    }

    #[test]
    fn planned_receivables_store_their_installments() {
        let record = receivable_record(
            &input(json!({"installment_count": 4, "first_due_date": "01/02/2025"})),
            today(),
        )
        .expect("record");

        let plan = record["installments"].as_array().expect("plan");
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0]["value"], 250.0);
        assert_eq!(plan[3]["due_date"], "2025-05-01");
        assert_eq!(record["due_date"], "2025-05-01");
        assert_eq!(record["status"], "OPEN");
        assert_eq!(record["document_date"], "2025-01-10");
        assert!(!record.contains_key("installment_count"));
        assert!(!record.contains_key("received_date"));
    }

    #[test]
    fn plans_need_a_first_due_date() {
        assert!(matches!(
            receivable_record(&input(json!({"installment_count": 2})), today()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn unplanned_receivables_keep_the_explicit_status() {
        let record = receivable_record(&input(json!({"status": "RECEIVED"})), today()).expect("record");
        assert_eq!(record["status"], "RECEIVED");
        assert_eq!(record["received_date"], "2025-01-10");
        assert_eq!(record["installments"], json!([]));
    }

    #[test]
    fn views_report_the_effective_status() {
        let mut plan = build_installments(100.0, 2, today()).expect("plan");
        plan[0].status = ReceivableStatus::Received;
        plan[0].paid_date = NaiveDate::from_ymd_opt(2025, 1, 12);
        assert_eq!(last_paid_date(&plan), NaiveDate::from_ymd_opt(2025, 1, 12));

        let receivable = decode_receivable(json!({
            "id": "r1",
            "client_id": null,
            "action_ids": ["a1"],
            "description": "Feira",
            "total": 100.0,
            "recurring": false,
            "installments": plan,
            "document_date": "2025-01-10",
            "due_date": null,
            "received_date": null,
            "status": "RECEIVED",
            "created_at": "2025-01-10T12:00:00+00:00"
        }))
        .expect("receivable");

        let view = receivable_view(&receivable, None).expect("view");
        assert_eq!(view["status"], "RECEIVED");
        assert_eq!(view["effective_status"], "OPEN");
        assert_eq!(view["received_installments"], 1);
        assert!(view.get("client_name").is_none());
    }
}
