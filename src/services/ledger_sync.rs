use std::future::Future;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::map_db_error,
    services::ledger::{Action, LineKind, NewLedgerLine},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    AlreadyExists,
}

/// Persistence seam for ledger lines. Implementations must treat the
/// natural key `(action_id, discriminant)` as unique per variant and report
/// a clash as [`InsertOutcome::AlreadyExists`].
pub trait LedgerStore {
    fn insert_if_absent(
        &self,
        line: &NewLedgerLine,
    ) -> impl Future<Output = AppResult<InsertOutcome>> + Send;

    fn delete_all_lines_for(&self, action_id: &str) -> impl Future<Output = AppResult<u64>> + Send;
}

pub struct PgLedgerStore<'a> {
    pool: &'a PgPool,
}

impl<'a> PgLedgerStore<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

impl LedgerStore for PgLedgerStore<'_> {
    async fn insert_if_absent(&self, line: &NewLedgerLine) -> AppResult<InsertOutcome> {
        let mut conn = self.pool.acquire().await.map_err(map_db_error)?;
        insert_line(&mut conn, line).await
    }

    async fn delete_all_lines_for(&self, action_id: &str) -> AppResult<u64> {
        let action_id = parse_uuid(action_id, "action_id")?;
        let mut conn = self.pool.acquire().await.map_err(map_db_error)?;
        delete_lines(&mut conn, action_id).await
    }
}

/// Ledger store bound to one open transaction. Nothing it writes is
/// visible until [`TxLedgerStore::commit`]; dropping it rolls back.
pub struct TxLedgerStore {
    tx: Mutex<Transaction<'static, Postgres>>,
}

impl TxLedgerStore {
    pub async fn begin(pool: &PgPool) -> AppResult<Self> {
        let tx = pool.begin().await.map_err(map_db_error)?;
        Ok(Self { tx: Mutex::new(tx) })
    }

    async fn delete_action(&self, action_id: uuid::Uuid) -> AppResult<u64> {
        let mut tx = self.tx.lock().await;
        let result = sqlx::query("DELETE FROM actions WHERE id = $1")
            .bind(action_id)
            .execute(&mut **tx)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected())
    }

    pub async fn commit(self) -> AppResult<()> {
        self.tx.into_inner().commit().await.map_err(map_db_error)
    }
}

impl LedgerStore for TxLedgerStore {
    async fn insert_if_absent(&self, line: &NewLedgerLine) -> AppResult<InsertOutcome> {
        let mut tx = self.tx.lock().await;
        insert_line(&mut tx, line).await
    }

    async fn delete_all_lines_for(&self, action_id: &str) -> AppResult<u64> {
        let action_id = parse_uuid(action_id, "action_id")?;
        let mut tx = self.tx.lock().await;
        delete_lines(&mut tx, action_id).await
    }
}

async fn insert_line(conn: &mut PgConnection, line: &NewLedgerLine) -> AppResult<InsertOutcome> {
    let action_id = parse_uuid(&line.action_id, "action_id")?;
    let query = match &line.kind {
        LineKind::Staff { name, pix, bank } => sqlx::query_scalar::<_, uuid::Uuid>(
            "INSERT INTO payables
                (action_id, staff_name, pix, bank, value, payment_method, due_date, report_date, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'OPEN')
             ON CONFLICT DO NOTHING
             RETURNING id",
        )
        .bind(action_id)
        .bind(name.clone())
        .bind(pix.clone())
        .bind(bank.clone()),
        LineKind::Cost {
            cost_id,
            description,
            collaborator_id,
            vendor_name,
            vendor_company,
        } => sqlx::query_scalar::<_, uuid::Uuid>(
            "INSERT INTO payables
                (action_id, cost_id, description, collaborator_id, vendor_name, vendor_company,
                 value, payment_method, due_date, report_date, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'OPEN')
             ON CONFLICT DO NOTHING
             RETURNING id",
        )
        .bind(action_id)
        .bind(cost_id.clone())
        .bind(description.clone())
        .bind(
            collaborator_id
                .as_deref()
                .and_then(|id| uuid::Uuid::try_parse(id).ok()),
        )
        .bind(vendor_name.clone())
        .bind(vendor_company.clone()),
    };

    let inserted = query
        .bind(line.value)
        .bind(line.payment_method.clone())
        .bind(line.due_date)
        .bind(line.report_date)
        .fetch_optional(conn)
        .await
        .map_err(map_db_error)?;

    Ok(if inserted.is_some() {
        InsertOutcome::Created
    } else {
        InsertOutcome::AlreadyExists
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub created: u32,
    pub unchanged: u32,
    pub failed: u32,
    pub created_keys: Vec<String>,
}

/// Derive one ledger line per staff and cost entry of `action`, inserting
/// only the ones whose natural key is not stored yet. Existing lines keep
/// their status. A failing line is logged and skipped; running the sync
/// again picks it up.
pub async fn sync_ledger_lines<S: LedgerStore>(
    store: &S,
    action: &Action,
    today: NaiveDate,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    let staff_lines = action
        .staff
        .iter()
        .map(|entry| NewLedgerLine::for_staff(action, entry, today));
    let cost_lines = action
        .costs
        .iter()
        .map(|entry| NewLedgerLine::for_cost(action, entry, today));

    for candidate in staff_lines.chain(cost_lines) {
        let line = match candidate {
            Ok(line) => line,
            Err(error) => {
                warn!(action_id = %action.id, error = %error, "Skipping underivable ledger line");
                outcome.failed += 1;
                continue;
            }
        };

        match store.insert_if_absent(&line).await {
            Ok(InsertOutcome::Created) => {
                outcome.created += 1;
                outcome.created_keys.push(line_key(&line.kind));
            }
            Ok(InsertOutcome::AlreadyExists) | Err(AppError::Conflict(_)) => {
                outcome.unchanged += 1;
            }
            Err(error) => {
                warn!(
                    action_id = %action.id,
                    key = %line_key(&line.kind),
                    error = %error,
                    "Ledger line insert failed"
                );
                outcome.failed += 1;
            }
        }
    }

    info!(
        action_id = %action.id,
        created = outcome.created,
        unchanged = outcome.unchanged,
        failed = outcome.failed,
        "Ledger lines synchronized"
    );
    outcome
}

/// Remove an action and every ledger line derived from it in one transaction.
pub async fn delete_action_with_lines(pool: &PgPool, action_id: &str) -> AppResult<u64> {
    let id = parse_uuid(action_id, "action_id")?;
    let store = TxLedgerStore::begin(pool).await?;

    let removed_lines = store.delete_all_lines_for(action_id).await?;
    if store.delete_action(id).await? == 0 {
        return Err(AppError::NotFound("actions record not found.".to_string()));
    }

    store.commit().await?;
    info!(action_id = %action_id, removed_lines, "Action deleted with its ledger lines");
    Ok(removed_lines)
}

async fn delete_lines(conn: &mut PgConnection, action_id: uuid::Uuid) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM payables WHERE action_id = $1")
        .bind(action_id)
        .execute(conn)
        .await
        .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

fn line_key(kind: &LineKind) -> String {
    let variant = match kind {
        LineKind::Staff { .. } => "staff",
        LineKind::Cost { .. } => "cost",
    };
    format!("{variant}:{}", kind.discriminant())
}

fn parse_uuid(raw: &str, field: &str) -> AppResult<uuid::Uuid> {
    uuid::Uuid::try_parse(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("{field} is not a valid id.")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::{sync_ledger_lines, InsertOutcome, LedgerStore};
    use crate::{
        error::{AppError, AppResult},
        services::ledger::{Action, LineKind, LineStatus, NewLedgerLine},
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Variant {
        Staff,
        Cost,
    }

    #[derive(Debug, Clone)]
    struct StoredLine {
        line: NewLedgerLine,
        status: LineStatus,
    }

    /// Keys lines the way the partial unique indexes do: one key space per variant.
    #[derive(Default)]
    struct MemoryStore {
        lines: Mutex<HashMap<(String, Variant, String), StoredLine>>,
        fail_on: Option<String>,
    }

    impl MemoryStore {
        fn len(&self) -> usize {
            self.lines.lock().expect("lock").len()
        }

        fn set_status(&self, action_id: &str, name: &str, status: LineStatus) {
            let mut lines = self.lines.lock().expect("lock");
            let key = (action_id.to_string(), Variant::Staff, name.to_string());
            if let Some(stored) = lines.get_mut(&key) {
                stored.status = status;
            }
        }

        fn status_of(&self, action_id: &str, name: &str) -> Option<LineStatus> {
            let lines = self.lines.lock().expect("lock");
            lines
                .get(&(action_id.to_string(), Variant::Staff, name.to_string()))
                .map(|stored| stored.status)
        }
    }

    impl LedgerStore for MemoryStore {
        async fn insert_if_absent(&self, line: &NewLedgerLine) -> AppResult<InsertOutcome> {
            if self.fail_on.as_deref() == Some(line.kind.discriminant()) {
                return Err(AppError::Dependency("write conflict".to_string()));
            }
            let variant = match line.kind {
                LineKind::Staff { .. } => Variant::Staff,
                LineKind::Cost { .. } => Variant::Cost,
            };
            let key = (
                line.action_id.clone(),
                variant,
                line.kind.discriminant().to_string(),
            );
            let mut lines = self.lines.lock().expect("lock");
            if lines.contains_key(&key) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            lines.insert(
                key,
                StoredLine {
                    line: line.clone(),
                    status: LineStatus::Open,
                },
            );
            Ok(InsertOutcome::Created)
        }

        async fn delete_all_lines_for(&self, action_id: &str) -> AppResult<u64> {
            let mut lines = self.lines.lock().expect("lock");
            let before = lines.len();
            lines.retain(|(owner, _, _), _| owner != action_id);
            Ok((before - lines.len()) as u64)
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
    }

    fn ana_action() -> Action {
        serde_json::from_value(json!({
            "id": "a1",
            "name": "Feira",
            "due_date": "2025-01-15",
            "staff": [{"name": "Ana", "value": 100.0}],
            "costs": []
        }))
        .expect("action json")
    }

    #[tokio::test]
    async fn first_sync_creates_open_staff_line() {
        let store = MemoryStore::default();
        let outcome = sync_ledger_lines(&store, &ana_action(), today()).await;

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.unchanged, 0);
        assert_eq!(outcome.created_keys, vec!["staff:Ana".to_string()]);

        let lines = store.lines.lock().expect("lock");
        let stored = lines.values().next().expect("one line");
        assert_eq!(stored.status, LineStatus::Open);
        assert_eq!(
            stored.line.report_date,
            NaiveDate::from_ymd_opt(2025, 1, 15).expect("date")
        );
        assert!(matches!(stored.line.kind, LineKind::Staff { ref name, .. } if name == "Ana"));
    }

    #[tokio::test]
    async fn resync_is_idempotent_and_keeps_status() {
        let store = MemoryStore::default();
        let action = ana_action();
        sync_ledger_lines(&store, &action, today()).await;
        store.set_status("a1", "Ana", LineStatus::Paid);

        let before = store.len();
        let outcome = sync_ledger_lines(&store, &action, today()).await;

        assert_eq!(store.len(), before);
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(store.status_of("a1", "Ana"), Some(LineStatus::Paid));
    }

    #[tokio::test]
    async fn staff_and_cost_keys_do_not_collide() {
        let store = MemoryStore::default();
        let action: Action = serde_json::from_value(json!({
            "id": "a1",
            "name": "Feira",
            "staff": [{"name": "same", "value": 1.0}],
            "costs": [{"id": "same", "description": "Som", "value": 2.0}]
        }))
        .expect("action json");

        let outcome = sync_ledger_lines(&store, &action, today()).await;
        assert_eq!(outcome.created, 2);
        assert_eq!(
            outcome.created_keys,
            vec!["staff:same".to_string(), "cost:same".to_string()]
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn failures_do_not_abort_siblings() {
        let store = MemoryStore {
            fail_on: Some("Bia".to_string()),
            ..MemoryStore::default()
        };
        let action: Action = serde_json::from_value(json!({
            "id": "a1",
            "name": "Feira",
            "staff": [
                {"name": "Ana", "value": 1.0},
                {"name": "Bia", "value": 1.0},
                {"name": "Caio", "value": 1.0}
            ],
            "costs": [{"description": "sem id", "value": 3.0}]
        }))
        .expect("action json");

        let outcome = sync_ledger_lines(&store, &action, today()).await;
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.failed, 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn conflict_errors_count_as_unchanged() {
        struct ConflictStore;
        impl LedgerStore for ConflictStore {
            async fn insert_if_absent(&self, _line: &NewLedgerLine) -> AppResult<InsertOutcome> {
                Err(AppError::Conflict("duplicate".to_string()))
            }
            async fn delete_all_lines_for(&self, _action_id: &str) -> AppResult<u64> {
                Ok(0)
            }
        }

        let outcome = sync_ledger_lines(&ConflictStore, &ana_action(), today()).await;
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn delete_removes_only_that_actions_lines() {
        let store = MemoryStore::default();
        let mut other = ana_action();
        other.id = "a2".to_string();
        sync_ledger_lines(&store, &ana_action(), today()).await;
        sync_ledger_lines(&store, &other, today()).await;

        let removed = store.delete_all_lines_for("a1").await.expect("delete");
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.status_of("a2", "Ana"), Some(LineStatus::Open));
    }
}
