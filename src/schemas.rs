use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    services::{
        installments::ReceivableStatus,
        ledger::{CostEntry, LineStatus, StaffEntry},
        money::{deserialize_amount, deserialize_loose_date},
        search_filter::SearchParams,
    },
};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateActionInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub event: Option<String>,
    pub client: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub due_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    #[serde(default)]
    pub staff: Vec<StaffEntry>,
    #[serde(default)]
    pub costs: Vec<CostEntry>,
}

/// Absent fields stay as stored; `staff`/`costs` replace the whole list.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct UpdateActionInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub event: Option<String>,
    pub client: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub due_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub staff: Option<Vec<StaffEntry>>,
    pub costs: Option<Vec<CostEntry>>,
}

/// Query string shared by every search endpoint. Range bounds stay raw text
/// so an unparseable date comes back as a 400 naming the parameter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub client_id: Option<String>,
    pub collaborator_id: Option<String>,
    pub collaborator_name: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub start_date_from: Option<String>,
    pub start_date_to: Option<String>,
    pub end_date_from: Option<String>,
    pub end_date_to: Option<String>,
    pub due_date_from: Option<String>,
    pub due_date_to: Option<String>,
    pub report_date_from: Option<String>,
    pub report_date_to: Option<String>,
    pub created_at_from: Option<String>,
    pub created_at_to: Option<String>,
    pub document_date_from: Option<String>,
    pub document_date_to: Option<String>,
    pub received_date_from: Option<String>,
    pub received_date_to: Option<String>,
}

impl SearchQuery {
    pub fn to_params(&self) -> AppResult<SearchParams> {
        let mut params = SearchParams {
            q: self.q.clone(),
            client_id: self.client_id.clone(),
            collaborator_id: self.collaborator_id.clone(),
            collaborator_name: self.collaborator_name.clone(),
            status: self.status.clone(),
            ranges: Vec::new(),
        };
        let pairs = [
            ("date", &self.date_from, &self.date_to),
            ("start_date", &self.start_date_from, &self.start_date_to),
            ("end_date", &self.end_date_from, &self.end_date_to),
            ("due_date", &self.due_date_from, &self.due_date_to),
            ("report_date", &self.report_date_from, &self.report_date_to),
            ("created_at", &self.created_at_from, &self.created_at_to),
            ("document_date", &self.document_date_from, &self.document_date_to),
            ("received_date", &self.received_date_from, &self.received_date_to),
        ];
        for (key, from, to) in pairs {
            params.push_range(key, from.as_deref(), to.as_deref())?;
        }
        Ok(params)
    }

    pub fn page_window(&self, default_size: i64, max_size: i64) -> (i64, i64, i64) {
        page_window(self.page, self.page_size, default_size, max_size)
    }
}

/// 1-based page and clamped size, as `(page, page_size, offset)`.
pub fn page_window(
    page: Option<i64>,
    page_size: Option<i64>,
    default_size: i64,
    max_size: i64,
) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let size = page_size.unwrap_or(default_size).clamp(1, max_size.max(1));
    (page, size, (page - 1).saturating_mul(size))
}

/// Read from the same query string as [`SearchQuery`].
#[derive(Debug, Clone, Deserialize)]
pub struct ReportSectionsQuery {
    #[serde(default = "default_true")]
    pub include_project_costs: bool,
    #[serde(default)]
    pub include_fixed_costs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayableStatusInput {
    pub status: LineStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateReceivableInput {
    pub client_id: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub action_ids: Vec<String>,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total: f64,
    #[serde(default)]
    pub recurring: bool,
    #[validate(range(min = 1, max = 120))]
    pub installment_count: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub first_due_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub document_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub due_date: Option<NaiveDate>,
    pub status: Option<ReceivableStatus>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallmentStatusInput {
    pub status: ReceivableStatus,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub paid_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateFixedCostInput {
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub value: f64,
    #[serde(default, deserialize_with = "deserialize_loose_date")]
    pub due_date: Option<NaiveDate>,
    pub status: Option<LineStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixedCostsQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionPath {
    pub action_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayablePath {
    pub payable_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceivablePath {
    pub receivable_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallmentPath {
    pub receivable_id: String,
    pub number: u32,
}
