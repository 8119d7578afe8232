//! Read-only lookups against the client and collaborator directories.

use serde::Deserialize;
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::{error::AppResult, repository::table_service::map_db_error};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Client {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Collaborator {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub pix: Option<String>,
}

/// Ids of clients whose name or code matches `pattern` (an escaped regex).
pub async fn find_client_ids_matching(pool: &PgPool, pattern: &str) -> AppResult<Vec<String>> {
    let rows = sqlx::query(
        "SELECT id::text AS id FROM clients
         WHERE name ~* $1 OR coalesce(code, '') ~* $1
         LIMIT 200",
    )
    .bind(pattern)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<String, _>("id").ok())
        .collect())
}

pub async fn load_clients(pool: &PgPool, ids: &[String]) -> AppResult<Vec<Client>> {
    let ids = uuid_list(ids);
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query("SELECT row_to_json(t) AS row FROM clients t WHERE t.id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;
    Ok(decode_rows(rows))
}

pub async fn load_collaborators(pool: &PgPool) -> AppResult<Vec<Collaborator>> {
    let rows = sqlx::query("SELECT row_to_json(t) AS row FROM collaborators t ORDER BY t.name")
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;
    Ok(decode_rows(rows))
}

fn uuid_list(ids: &[String]) -> Vec<uuid::Uuid> {
    let mut parsed = ids
        .iter()
        .filter_map(|id| uuid::Uuid::try_parse(id.trim()).ok())
        .collect::<Vec<_>>();
    parsed.sort_unstable();
    parsed.dedup();
    parsed
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<sqlx::postgres::PgRow>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(error) => {
                tracing::warn!(error = %error, "Skipping undecodable directory row");
                None
            }
        })
        .collect()
}
