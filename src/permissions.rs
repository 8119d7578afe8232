//! The opaque capability check: a user's `app_users.role` must be one of
//! the roles an operation allows.

use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::map_db_error,
    state::AppState,
};

pub const READ_ROLES: &[&str] = &["admin", "finance", "viewer"];
pub const WRITE_ROLES: &[&str] = &["admin", "finance"];

fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state
        .db_pool
        .as_ref()
        .ok_or_else(|| AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string()))
}

pub async fn get_user_role(state: &AppState, user_id: &str) -> AppResult<Option<String>> {
    let pool = db_pool(state)?;
    let row = sqlx::query("SELECT role FROM app_users WHERE id = $1::uuid LIMIT 1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    Ok(row.and_then(|row| row.try_get::<String, _>("role").ok()))
}

pub async fn assert_capability(
    state: &AppState,
    user_id: &str,
    allowed_roles: &[&str],
) -> AppResult<Value> {
    if state.config.auth_dev_overrides_enabled() {
        return Ok(json!({ "user_id": user_id, "role": "admin" }));
    }

    let role = get_user_role(state, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Forbidden: unknown user.".to_string()))?;
    role_allowed(&role, allowed_roles)?;
    Ok(json!({ "user_id": user_id, "role": role }))
}

fn role_allowed(role: &str, allowed_roles: &[&str]) -> AppResult<()> {
    if allowed_roles.contains(&role.trim()) {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}
