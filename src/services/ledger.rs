//! Parent records ("actions") and the payable ledger lines derived from them.
//!
//! A ledger line is either a staff payment or a cost payment. The variant is
//! explicit in [`LineKind`]; the storage row keeps two nullable discriminant
//! columns and [`LedgerLine::try_from`] refuses rows where both or neither
//! are set.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    services::money::{deserialize_amount, deserialize_loose_date},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffEntry {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub value: f64,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub pix: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub value: f64,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub collaborator_id: Option<String>,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub vendor_company: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub staff: Vec<StaffEntry>,
    #[serde(default)]
    pub costs: Vec<CostEntry>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Cost entries are keyed by id; entries written without one get a UUID.
pub fn assign_cost_ids(costs: &mut [CostEntry]) {
    for cost in costs {
        let missing = cost.id.as_deref().map(str::trim).unwrap_or_default().is_empty();
        if missing {
            cost.id = Some(uuid::Uuid::new_v4().to_string());
        }
    }
}

pub fn validate_entries(staff: &[StaffEntry], costs: &[CostEntry]) -> AppResult<()> {
    let mut staff_names = HashSet::new();
    for (index, entry) in staff.iter().enumerate() {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest(format!(
                "staff[{index}].name is required."
            )));
        }
        validate_value(entry.value, &format!("staff[{index}].value"))?;
        if !staff_names.insert(name.to_string()) {
            return Err(AppError::BadRequest(format!(
                "staff name '{name}' appears more than once."
            )));
        }
    }

    let mut cost_ids = HashSet::new();
    for (index, entry) in costs.iter().enumerate() {
        if entry.description.trim().is_empty() {
            return Err(AppError::BadRequest(format!(
                "costs[{index}].description is required."
            )));
        }
        validate_value(entry.value, &format!("costs[{index}].value"))?;
        if let Some(collaborator_id) = non_empty(entry.collaborator_id.as_deref()) {
            if uuid::Uuid::try_parse(&collaborator_id).is_err() {
                return Err(AppError::BadRequest(format!(
                    "costs[{index}].collaborator_id is not a valid id."
                )));
            }
        }
        if let Some(id) = entry.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            if !cost_ids.insert(id.to_string()) {
                return Err(AppError::BadRequest(format!(
                    "cost id '{id}' appears more than once."
                )));
            }
        }
    }
    Ok(())
}

fn validate_value(value: f64, field: &str) -> AppResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::BadRequest(format!(
            "{field} must be a finite, non-negative amount."
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineStatus {
    Open,
    Paid,
}

impl LineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Paid => "PAID",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "PAID" => Ok(Self::Paid),
            other => Err(AppError::BadRequest(format!(
                "Invalid payable status '{other}'. Expected OPEN or PAID."
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineKind {
    Staff {
        name: String,
        pix: Option<String>,
        bank: Option<String>,
    },
    Cost {
        cost_id: String,
        description: String,
        collaborator_id: Option<String>,
        vendor_name: Option<String>,
        vendor_company: Option<String>,
    },
}

impl LineKind {
    /// Second half of the natural key `(action_id, discriminant)`.
    pub fn discriminant(&self) -> &str {
        match self {
            Self::Staff { name, .. } => name,
            Self::Cost { cost_id, .. } => cost_id,
        }
    }

    pub fn collaborator_id(&self) -> Option<&str> {
        match self {
            Self::Staff { .. } => None,
            Self::Cost {
                collaborator_id, ..
            } => collaborator_id.as_deref(),
        }
    }
}

/// A ledger line about to be inserted. Status always starts OPEN.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerLine {
    pub action_id: String,
    pub kind: LineKind,
    pub value: f64,
    pub payment_method: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub report_date: NaiveDate,
}

impl NewLedgerLine {
    pub fn for_staff(action: &Action, entry: &StaffEntry, today: NaiveDate) -> AppResult<Self> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("staff name is required.".to_string()));
        }
        Ok(Self {
            action_id: action.id.clone(),
            kind: LineKind::Staff {
                name: name.to_string(),
                pix: non_empty(entry.pix.as_deref()),
                bank: non_empty(entry.bank.as_deref()),
            },
            value: entry.value,
            payment_method: non_empty(entry.payment_method.as_deref()),
            due_date: entry.due_date,
            report_date: action.due_date.unwrap_or(today),
        })
    }

    pub fn for_cost(action: &Action, entry: &CostEntry, today: NaiveDate) -> AppResult<Self> {
        let Some(cost_id) = non_empty(entry.id.as_deref()) else {
            return Err(AppError::BadRequest(format!(
                "cost entry '{}' has no id.",
                entry.description
            )));
        };
        Ok(Self {
            action_id: action.id.clone(),
            kind: LineKind::Cost {
                cost_id,
                description: entry.description.trim().to_string(),
                collaborator_id: non_empty(entry.collaborator_id.as_deref()),
                vendor_name: non_empty(entry.vendor_name.as_deref()),
                vendor_company: non_empty(entry.vendor_company.as_deref()),
            },
            value: entry.value,
            payment_method: non_empty(entry.payment_method.as_deref()),
            due_date: entry.due_date,
            report_date: action.due_date.unwrap_or(today),
        })
    }
}

/// Flat `payables` row as produced by `row_to_json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PayableRow {
    pub id: String,
    pub action_id: String,
    pub staff_name: Option<String>,
    pub pix: Option<String>,
    pub bank: Option<String>,
    pub cost_id: Option<String>,
    pub description: Option<String>,
    pub collaborator_id: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_company: Option<String>,
    #[serde(default)]
    pub value: f64,
    pub payment_method: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub report_date: NaiveDate,
    pub status: LineStatus,
    pub paid_at: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerLine {
    pub id: String,
    pub action_id: String,
    #[serde(flatten)]
    pub kind: LineKind,
    pub value: f64,
    pub payment_method: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub report_date: NaiveDate,
    pub status: LineStatus,
    pub paid_at: Option<String>,
    pub created_at: Option<String>,
}

impl TryFrom<PayableRow> for LedgerLine {
    type Error = AppError;

    fn try_from(row: PayableRow) -> Result<Self, Self::Error> {
        let staff_name = non_empty(row.staff_name.as_deref());
        let cost_id = non_empty(row.cost_id.as_deref());
        let kind = match (staff_name, cost_id) {
            (Some(name), None) => LineKind::Staff {
                name,
                pix: row.pix,
                bank: row.bank,
            },
            (None, Some(cost_id)) => LineKind::Cost {
                cost_id,
                description: row.description.unwrap_or_default(),
                collaborator_id: row.collaborator_id,
                vendor_name: row.vendor_name,
                vendor_company: row.vendor_company,
            },
            _ => {
                return Err(AppError::Internal(format!(
                    "payable {} must carry exactly one of staff_name or cost_id.",
                    row.id
                )))
            }
        };

        Ok(Self {
            id: row.id,
            action_id: row.action_id,
            kind,
            value: row.value,
            payment_method: row.payment_method,
            due_date: row.due_date,
            report_date: row.report_date,
            status: row.status,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

impl LedgerLine {
    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        let row = serde_json::from_value::<PayableRow>(value)
            .map_err(|error| AppError::Internal(format!("Malformed payable row: {error}")))?;
        Self::try_from(row)
    }
}

pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{
        assign_cost_ids, validate_entries, Action, CostEntry, LedgerLine, LineKind, LineStatus,
        NewLedgerLine, StaffEntry,
    };

    fn staff(name: &str, value: f64) -> StaffEntry {
        StaffEntry {
            name: name.to_string(),
            value,
            payment_method: None,
            pix: None,
            bank: None,
            due_date: None,
        }
    }

    fn cost(id: Option<&str>, description: &str, value: f64) -> CostEntry {
        CostEntry {
            id: id.map(ToOwned::to_owned),
            description: description.to_string(),
            value,
            payment_method: None,
            collaborator_id: None,
            vendor_name: None,
            vendor_company: None,
            due_date: None,
        }
    }

    fn action() -> Action {
        serde_json::from_value(json!({
            "id": "a1",
            "name": "Feira",
            "due_date": "2025-01-15",
            "staff": [{"name": "Ana", "value": 100.0}],
            "costs": []
        }))
        .expect("action json")
    }

    #[test]
    fn rejects_invalid_entries() {
        assert!(validate_entries(&[staff(" ", 10.0)], &[]).is_err());
        assert!(validate_entries(&[staff("Ana", -1.0)], &[]).is_err());
        assert!(validate_entries(&[staff("Ana", f64::NAN)], &[]).is_err());
        assert!(validate_entries(&[staff("Ana", 1.0), staff("Ana", 2.0)], &[]).is_err());
        assert!(validate_entries(&[], &[cost(None, "", 1.0)]).is_err());
        assert!(validate_entries(&[], &[cost(None, "Som", f64::INFINITY)]).is_err());
        assert!(
            validate_entries(&[], &[cost(Some("c1"), "Som", 1.0), cost(Some("c1"), "Luz", 1.0)])
                .is_err()
        );
        assert!(validate_entries(&[staff("Ana", 0.0)], &[cost(None, "Som", 0.0)]).is_ok());
    }

    #[test]
    fn assigns_missing_cost_ids_only() {
        let mut action = action();
        action.costs = vec![cost(None, "Som", 10.0), cost(Some("keep"), "Luz", 5.0)];
        assign_cost_ids(&mut action.costs);
        assert!(action.costs[0].id.as_deref().is_some_and(|id| !id.is_empty()));
        assert_eq!(action.costs[1].id.as_deref(), Some("keep"));
    }

    #[test]
    fn staff_line_uses_action_due_date_or_today() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date");
        let mut action = action();
        let line = NewLedgerLine::for_staff(&action, &action.staff[0], today).expect("line");
        assert_eq!(line.kind.discriminant(), "Ana");
        assert_eq!(line.report_date, NaiveDate::from_ymd_opt(2025, 1, 15).expect("date"));

        action.due_date = None;
        let line = NewLedgerLine::for_staff(&action, &action.staff[0], today).expect("line");
        assert_eq!(line.report_date, today);
    }

    #[test]
    fn cost_line_requires_an_id() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date");
        let action = action();
        assert!(NewLedgerLine::for_cost(&action, &cost(None, "Som", 1.0), today).is_err());
        let line =
            NewLedgerLine::for_cost(&action, &cost(Some("c9"), "Som", 1.0), today).expect("line");
        assert_eq!(line.kind.discriminant(), "c9");
        assert!(matches!(line.kind, LineKind::Cost { .. }));
    }

    #[test]
    fn decoding_enforces_exactly_one_discriminant() {
        let base = json!({
            "id": "p1",
            "action_id": "a1",
            "value": 10.0,
            "report_date": "2025-01-15",
            "status": "OPEN"
        });

        let mut staff_row = base.clone();
        staff_row["staff_name"] = json!("Ana");
        let line = LedgerLine::from_value(staff_row).expect("staff line");
        assert!(matches!(line.kind, LineKind::Staff { ref name, .. } if name == "Ana"));
        assert_eq!(line.status, LineStatus::Open);

        let mut cost_row = base.clone();
        cost_row["cost_id"] = json!("c1");
        cost_row["description"] = json!("Som");
        assert!(LedgerLine::from_value(cost_row).is_ok());

        let mut both = base.clone();
        both["staff_name"] = json!("Ana");
        both["cost_id"] = json!("c1");
        assert!(LedgerLine::from_value(both).is_err());

        assert!(LedgerLine::from_value(base).is_err());
    }

    #[test]
    fn parses_status_case_insensitively() {
        assert_eq!(LineStatus::parse("paid").expect("status"), LineStatus::Paid);
        assert!(LineStatus::parse("LATE").is_err());
    }
}
