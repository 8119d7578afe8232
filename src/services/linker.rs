//! Best-effort decoration of ledger lines and actions with directory data.
//!
//! Nothing here fails a request: directory loads return [`Skipped`] and the
//! caller omits the decorated field.

use serde::Serialize;
use sqlx::PgPool;

use crate::{
    repository::directory::{load_clients, load_collaborators, Client, Collaborator},
    services::ledger::{Action, LineKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub reason: String,
}

impl Skipped {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Reference,
    Name,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterpartyView {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub bank: Option<String>,
    pub pix: Option<String>,
    pub matched_by: MatchSource,
}

/// Explicit `collaborator_id` first, then (staff lines only) a trimmed,
/// case-insensitive exact name match. Inline line fields win over the
/// directory's.
pub fn resolve_counterparty(line: &LineKind, directory: &[Collaborator]) -> Option<CounterpartyView> {
    if let Some(reference) = line.collaborator_id() {
        let found = directory
            .iter()
            .find(|collaborator| collaborator.id.eq_ignore_ascii_case(reference.trim()))?;
        return Some(merge(line, found, MatchSource::Reference));
    }

    let LineKind::Staff { name, .. } = line else {
        return None;
    };
    let wanted = name.trim().to_lowercase();
    directory
        .iter()
        .find(|collaborator| collaborator.name.trim().to_lowercase() == wanted)
        .map(|found| merge(line, found, MatchSource::Name))
}

fn merge(line: &LineKind, found: &Collaborator, matched_by: MatchSource) -> CounterpartyView {
    let (name, company, bank, pix) = match line {
        LineKind::Staff { name, pix, bank } => (Some(name.clone()), None, bank.clone(), pix.clone()),
        LineKind::Cost {
            vendor_name,
            vendor_company,
            ..
        } => (vendor_name.clone(), vendor_company.clone(), None, None),
    };
    CounterpartyView {
        id: found.id.clone(),
        name: name.unwrap_or_else(|| found.name.clone()),
        company: company.or_else(|| found.company.clone()),
        bank: bank.or_else(|| found.bank.clone()),
        pix: pix.or_else(|| found.pix.clone()),
        matched_by,
    }
}

/// Display name for an action's client. Legacy rows store a free-text name
/// instead of an id; those come back unchanged.
pub fn resolve_client_name(action: &Action, clients: &[Client]) -> Option<String> {
    client_label(action.client.as_deref(), clients)
}

/// Same lookup for any stored client reference.
pub fn client_label(reference: Option<&str>, clients: &[Client]) -> Option<String> {
    let raw = reference?.trim();
    if raw.is_empty() {
        return None;
    }
    if uuid::Uuid::try_parse(raw).is_err() {
        return Some(raw.to_string());
    }
    clients
        .iter()
        .find(|client| client.id.eq_ignore_ascii_case(raw))
        .map(|client| client.name.clone())
        .or_else(|| Some(raw.to_string()))
}

pub async fn collaborator_directory(pool: &PgPool) -> Result<Vec<Collaborator>, Skipped> {
    load_collaborators(pool).await.map_err(|error| {
        tracing::warn!(error = %error, "Counterparty enrichment skipped");
        Skipped::new(error.to_string())
    })
}

/// Clients referenced by `ids`; entries that are not ids are ignored.
pub async fn client_directory(pool: &PgPool, ids: &[String]) -> Result<Vec<Client>, Skipped> {
    load_clients(pool, ids).await.map_err(|error| {
        tracing::warn!(error = %error, "Client name enrichment skipped");
        Skipped::new(error.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::{resolve_client_name, resolve_counterparty, MatchSource};
    use crate::{
        repository::directory::{Client, Collaborator},
        services::ledger::{Action, LineKind},
    };

    const ANA_ID: &str = "550e8400-e29b-41d4-a716-446655440000";
    const ACME_ID: &str = "6f9619ff-8b86-d011-b42d-00cf4fc964ff";

    fn directory() -> Vec<Collaborator> {
        vec![Collaborator {
            id: ANA_ID.to_string(),
            code: Some("C-01".to_string()),
            name: "Ana Souza".to_string(),
            company: Some("Ana Eventos".to_string()),
            bank: Some("Banco 1".to_string()),
            pix: Some("ana@pix".to_string()),
        }]
    }

    fn staff(name: &str, pix: Option<&str>) -> LineKind {
        LineKind::Staff {
            name: name.to_string(),
            pix: pix.map(str::to_string),
            bank: None,
        }
    }

    fn action(client: Option<&str>) -> Action {
        Action {
            id: "a1".to_string(),
            name: "Feira".to_string(),
            event: None,
            client: client.map(str::to_string),
            date: None,
            start_date: None,
            end_date: None,
            due_date: None,
            payment_method: None,
            created_by: None,
            staff: Vec::new(),
            costs: Vec::new(),
            created_at: None,
        }
    }

    #[test]
    fn explicit_reference_wins() {
        let line = LineKind::Cost {
            cost_id: "c1".to_string(),
            description: "Som".to_string(),
            collaborator_id: Some(ANA_ID.to_uppercase()),
            vendor_name: None,
            vendor_company: None,
        };
        let view = resolve_counterparty(&line, &directory()).expect("resolved");
        assert_eq!(view.matched_by, MatchSource::Reference);
        assert_eq!(view.name, "Ana Souza");
        assert_eq!(view.bank.as_deref(), Some("Banco 1"));
    }

    #[test]
    fn staff_lines_fall_back_to_exact_name() {
        let view = resolve_counterparty(&staff("  ana souza ", Some("inline-key")), &directory())
            .expect("resolved");
        assert_eq!(view.matched_by, MatchSource::Name);
        assert_eq!(view.pix.as_deref(), Some("inline-key"));
        assert_eq!(view.bank.as_deref(), Some("Banco 1"));
        assert_eq!(view.name, "  ana souza ");

        assert!(resolve_counterparty(&staff("Ana", None), &directory()).is_none());
    }

    #[test]
    fn unreferenced_costs_do_not_match_by_name() {
        let line = LineKind::Cost {
            cost_id: "c1".to_string(),
            description: "Ana Souza".to_string(),
            collaborator_id: None,
            vendor_name: Some("Ana Souza".to_string()),
            vendor_company: None,
        };
        assert!(resolve_counterparty(&line, &directory()).is_none());
    }

    #[test]
    fn client_names_resolve_by_id_or_pass_through() {
        let clients = vec![Client {
            id: ACME_ID.to_string(),
            code: None,
            name: "Acme".to_string(),
            company: None,
        }];
        assert_eq!(
            resolve_client_name(&action(Some(ACME_ID)), &clients).as_deref(),
            Some("Acme")
        );
        assert_eq!(
            resolve_client_name(&action(Some("Legacy Client")), &clients).as_deref(),
            Some("Legacy Client")
        );
        assert_eq!(resolve_client_name(&action(None), &clients), None);
        assert_eq!(
            resolve_client_name(&action(Some(ANA_ID)), &clients).as_deref(),
            Some(ANA_ID)
        );
    }
}
