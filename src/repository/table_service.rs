use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};

use crate::{
    error::AppError,
    services::search_filter::{order_clause, push_predicate, Field, Predicate, SearchProfile},
};

const ALLOWED_TABLES: &[&str] = &[
    "actions",
    "app_users",
    "clients",
    "collaborators",
    "fixed_costs",
    "payables",
    "receivables",
];

pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Filters are plain equality on `t.<column>`; compound searches go
/// through [`search_rows`].
pub async fn list_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = select_query(table, filters, order_by, ascending)?;
    push_page(&mut query, limit, offset);

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// [`list_rows`] without paging, for reports that total every row.
pub async fn list_all_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = select_query(table, filters, order_by, ascending)?;
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

fn select_query<'a>(
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
    ascending: bool,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_equality_filters(&mut query, filters)?;
    query
        .push(" ORDER BY t.")
        .push(order_name)
        .push(if ascending { " ASC" } else { " DESC" });
    Ok(query)
}

pub async fn count_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_equality_filters(&mut query, filters)?;

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

/// One page of `profile` rows matching `predicate`, plus the unpaged total.
pub async fn search_rows(
    pool: &PgPool,
    profile: &SearchProfile,
    predicate: &Predicate,
    sort: (Field, bool),
    limit: i64,
    offset: i64,
) -> Result<(Vec<Value>, i64), AppError> {
    let mut query = QueryBuilder::<Postgres>::new(profile.row_select);
    query.push(" WHERE ");
    push_predicate(&mut query, predicate);
    query.push(" ORDER BY ").push(order_clause(sort.0, sort.1));
    push_page(&mut query, limit, offset);
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;

    let mut count = QueryBuilder::<Postgres>::new(profile.count_select);
    count.push(" WHERE ");
    push_predicate(&mut count, predicate);
    let total = count
        .build()
        .fetch_one(pool)
        .await
        .map_err(map_db_error)?
        .try_get::<i64, _>("total")
        .unwrap_or(0);

    Ok((read_rows(rows), total))
}

/// Every row matching `predicate`, for reports. Not paged: subtotals need
/// the whole set.
pub async fn search_all(
    pool: &PgPool,
    profile: &SearchProfile,
    predicate: &Predicate,
    sort: (Field, bool),
) -> Result<Vec<Value>, AppError> {
    let mut query = search_all_query(profile, predicate, sort);
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

fn search_all_query<'a>(
    profile: &SearchProfile,
    predicate: &Predicate,
    sort: (Field, bool),
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new(profile.row_select);
    query.push(" WHERE ");
    push_predicate(&mut query, predicate);
    query.push(" ORDER BY ").push(order_clause(sort.0, sort.1));
    query
}

pub async fn get_row(pool: &PgPool, table: &str, row_id: &str) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id = parse_row_id(table_name, row_id)?;

    let row = sqlx::query(&format!(
        "SELECT row_to_json(t) AS row FROM {table_name} t WHERE t.id = $1 LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let mut query = insert_query(table_name, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let id = parse_row_id(table_name, row_id)?;

    let mut query = update_query(table_name, payload)?;
    query
        .push(" WHERE t.id = ")
        .push_bind(id)
        .push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

// jsonb_populate_record lets PostgreSQL coerce each key to its column type.
fn insert_query<'a>(
    table_name: &'a str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ")
        .push_bind(Value::Object(payload.clone()))
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");
    Ok(query)
}

fn update_query<'a>(
    table_name: &'a str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ")
        .push_bind(Value::Object(payload.clone()))
        .push(") r");
    Ok(query)
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn push_equality_filters(
    query: &mut QueryBuilder<'_, Postgres>,
    filters: Option<&Map<String, Value>>,
) -> Result<(), AppError> {
    let Some(filters) = filters else {
        return Ok(());
    };
    for (key, value) in filters {
        let column = validate_identifier(key)?;
        match value {
            Value::Null => {}
            Value::Array(items) => {
                let values = items.iter().map(render_scalar).collect::<Vec<_>>();
                if values.is_empty() {
                    continue;
                }
                query
                    .push(" AND t.")
                    .push(column)
                    .push("::text = ANY(")
                    .push_bind(values)
                    .push(")");
            }
            other => {
                query
                    .push(" AND t.")
                    .push(column)
                    .push("::text = ")
                    .push_bind(render_scalar(other));
            }
        }
    }
    Ok(())
}

fn push_page(query: &mut QueryBuilder<'_, Postgres>, limit: i64, offset: i64) {
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, MAX_PAGE_LIMIT))
        .push(" OFFSET ")
        .push_bind(offset.max(0));
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn parse_row_id(table_name: &str, row_id: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::try_parse(row_id.trim())
        .map_err(|_| AppError::NotFound(format!("{table_name} record not found.")))
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let well_formed = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) && !trimmed.starts_with(|first: char| first.is_ascii_digit());
    if !well_formed {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    let unique_violation = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| code == "23505");
    if unique_violation
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}
