//! Composes list filters (free text, counterparty, client, date ranges,
//! status) into one [`Predicate`].
//!
//! A predicate is rendered to SQL with [`push_predicate`] for the store and
//! can be evaluated in memory against a JSON document with
//! [`Predicate::matches`], which is what post-query narrowing uses.

use chrono::{Days, NaiveDate};
use regex::RegexBuilder;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    repository::directory::find_client_ids_matching,
    services::{ledger::StaffEntry, money::parse_loose_date},
};

/// Alias used for the elements of an embedded array inside [`Predicate::AnyElement`].
pub const ELEMENT: &str = "e";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub alias: &'static str,
    pub column: &'static str,
}

impl Field {
    pub const fn new(alias: &'static str, column: &'static str) -> Self {
        Self { alias, column }
    }

    pub const fn element(key: &'static str) -> Self {
        Self {
            alias: ELEMENT,
            column: key,
        }
    }

    fn sql(&self) -> String {
        if self.alias == ELEMENT {
            format!("{ELEMENT}.value->>'{}'", self.column)
        } else {
            format!("{}.{}", self.alias, self.column)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    /// Case-insensitive regex match; `pattern` is already escaped by the builder.
    Matches {
        field: Field,
        pattern: String,
    },
    Equals {
        field: Field,
        value: String,
    },
    /// Membership of ids, compared case-insensitively.
    In {
        field: Field,
        values: Vec<String>,
    },
    /// `from <= field < until`, compared as calendar dates.
    Range {
        field: Field,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    },
    AnyElement {
        array: Field,
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All(items) => items.iter().all(|item| item.matches(doc)),
            Self::Any(items) => items.iter().any(|item| item.matches(doc)),
            Self::Matches { field, pattern } => {
                let Some(text) = field_text(doc, field) else {
                    return false;
                };
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .is_ok_and(|regex| regex.is_match(&text))
            }
            Self::Equals { field, value } => field_text(doc, field).is_some_and(|text| text == *value),
            Self::In { field, values } => field_text(doc, field)
                .is_some_and(|text| values.iter().any(|value| value.eq_ignore_ascii_case(&text))),
            Self::Range { field, from, until } => {
                let Some(date) = field_text(doc, field).and_then(|text| leading_date(&text)) else {
                    return false;
                };
                from.map_or(true, |from| date >= from) && until.map_or(true, |until| date < until)
            }
            Self::AnyElement { array, predicate } => doc
                .get(array.column)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| predicate.matches(item))),
        }
    }
}

fn field_text(doc: &Value, field: &Field) -> Option<String> {
    match doc.get(field.column)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}

fn leading_date(text: &str) -> Option<NaiveDate> {
    let head = text.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub fn push_predicate(query: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::All(items) => push_group(query, items, " AND ", "TRUE"),
        Predicate::Any(items) => push_group(query, items, " OR ", "FALSE"),
        Predicate::Matches { field, pattern } => {
            query
                .push(field.sql())
                .push("::text ~* ")
                .push_bind(pattern.clone());
        }
        Predicate::Equals { field, value } => {
            query
                .push(field.sql())
                .push("::text = ")
                .push_bind(value.clone());
        }
        Predicate::In { field, values } => {
            let lowered = values
                .iter()
                .map(|value| value.to_ascii_lowercase())
                .collect::<Vec<_>>();
            query
                .push("lower(")
                .push(field.sql())
                .push("::text) = ANY(")
                .push_bind(lowered)
                .push(")");
        }
        Predicate::Range { field, from, until } => {
            let column = field.sql();
            query.push("(");
            match (from, until) {
                (None, None) => {
                    query.push("TRUE");
                }
                (Some(from), None) => {
                    query.push("(").push(&column).push(")::date >= ").push_bind(*from);
                }
                (None, Some(until)) => {
                    query.push("(").push(&column).push(")::date < ").push_bind(*until);
                }
                (Some(from), Some(until)) => {
                    query
                        .push("(")
                        .push(&column)
                        .push(")::date >= ")
                        .push_bind(*from)
                        .push(" AND (")
                        .push(&column)
                        .push(")::date < ")
                        .push_bind(*until);
                }
            }
            query.push(")");
        }
        Predicate::AnyElement { array, predicate } => {
            query
                .push("EXISTS (SELECT 1 FROM jsonb_array_elements(")
                .push(array.sql())
                .push(") AS ")
                .push(ELEMENT)
                .push("(value) WHERE ");
            push_predicate(query, predicate);
            query.push(")");
        }
    }
}

fn push_group(
    query: &mut QueryBuilder<'_, Postgres>,
    items: &[Predicate],
    joiner: &str,
    empty: &str,
) {
    if items.is_empty() {
        query.push(empty);
        return;
    }
    query.push("(");
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            query.push(joiner);
        }
        push_predicate(query, item);
    }
    query.push(")");
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddedText {
    pub array: Field,
    pub keys: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub enum CounterpartyMatch {
    /// Through an action's embedded `costs` and `staff` arrays.
    Embedded { costs: Field, staff: Field },
    /// Through the denormalized columns of a ledger line.
    Line {
        collaborator: Field,
        staff_name: Field,
        vendor_name: Field,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SearchProfile {
    pub table: &'static str,
    pub row_select: &'static str,
    pub count_select: &'static str,
    pub text_fields: &'static [Field],
    pub embedded_text: &'static [EmbeddedText],
    pub client_field: Option<Field>,
    pub loose_date_fields: &'static [Field],
    pub counterparty: Option<CounterpartyMatch>,
    pub date_ranges: &'static [(&'static str, Field)],
    pub status: Option<(Field, &'static [&'static str])>,
    pub sort_fields: &'static [(&'static str, Field)],
    pub default_sort: Field,
}

const STAFF_TEXT: EmbeddedText = EmbeddedText {
    array: Field::new("t", "staff"),
    keys: &["name", "pix", "bank"],
};

pub const ACTIONS: SearchProfile = SearchProfile {
    table: "actions",
    row_select: "SELECT row_to_json(t) AS row FROM actions t",
    count_select: "SELECT COUNT(*)::bigint AS total FROM actions t",
    text_fields: &[
        Field::new("t", "name"),
        Field::new("t", "event"),
        Field::new("t", "payment_method"),
        Field::new("t", "created_by"),
    ],
    embedded_text: &[STAFF_TEXT],
    client_field: Some(Field::new("t", "client")),
    loose_date_fields: &[
        Field::new("t", "date"),
        Field::new("t", "start_date"),
        Field::new("t", "end_date"),
        Field::new("t", "due_date"),
        Field::new("t", "created_at"),
    ],
    counterparty: Some(CounterpartyMatch::Embedded {
        costs: Field::new("t", "costs"),
        staff: Field::new("t", "staff"),
    }),
    date_ranges: &[
        ("date", Field::new("t", "date")),
        ("start_date", Field::new("t", "start_date")),
        ("end_date", Field::new("t", "end_date")),
        ("due_date", Field::new("t", "due_date")),
    ],
    status: None,
    sort_fields: &[
        ("name", Field::new("t", "name")),
        ("date", Field::new("t", "date")),
        ("due_date", Field::new("t", "due_date")),
        ("created_at", Field::new("t", "created_at")),
    ],
    default_sort: Field::new("t", "created_at"),
};

pub const PAYABLES: SearchProfile = SearchProfile {
    table: "payables",
    row_select: "SELECT (to_jsonb(p) || jsonb_build_object(
            'action', jsonb_build_object(
                'id', t.id, 'name', t.name, 'event', t.event, 'client', t.client, 'date', t.date
            )
        ))::json AS row
        FROM payables p JOIN actions t ON t.id = p.action_id",
    count_select: "SELECT COUNT(*)::bigint AS total FROM payables p JOIN actions t ON t.id = p.action_id",
    text_fields: &[
        Field::new("t", "name"),
        Field::new("t", "event"),
        Field::new("t", "payment_method"),
        Field::new("t", "created_by"),
        Field::new("p", "staff_name"),
        Field::new("p", "pix"),
        Field::new("p", "bank"),
        Field::new("p", "description"),
        Field::new("p", "vendor_name"),
    ],
    embedded_text: &[],
    client_field: Some(Field::new("t", "client")),
    loose_date_fields: &[
        Field::new("p", "report_date"),
        Field::new("p", "due_date"),
        Field::new("t", "date"),
        Field::new("p", "created_at"),
    ],
    counterparty: Some(CounterpartyMatch::Line {
        collaborator: Field::new("p", "collaborator_id"),
        staff_name: Field::new("p", "staff_name"),
        vendor_name: Field::new("p", "vendor_name"),
    }),
    date_ranges: &[
        ("report_date", Field::new("p", "report_date")),
        ("due_date", Field::new("p", "due_date")),
        ("date", Field::new("t", "date")),
        ("created_at", Field::new("p", "created_at")),
    ],
    status: Some((Field::new("p", "status"), &["OPEN", "PAID"])),
    sort_fields: &[
        ("report_date", Field::new("p", "report_date")),
        ("due_date", Field::new("p", "due_date")),
        ("value", Field::new("p", "value")),
        ("status", Field::new("p", "status")),
        ("created_at", Field::new("p", "created_at")),
    ],
    default_sort: Field::new("p", "report_date"),
};

pub const RECEIVABLES: SearchProfile = SearchProfile {
    table: "receivables",
    row_select: "SELECT row_to_json(t) AS row FROM receivables t",
    count_select: "SELECT COUNT(*)::bigint AS total FROM receivables t",
    text_fields: &[Field::new("t", "description")],
    embedded_text: &[],
    client_field: Some(Field::new("t", "client_id")),
    loose_date_fields: &[
        Field::new("t", "document_date"),
        Field::new("t", "due_date"),
        Field::new("t", "received_date"),
        Field::new("t", "created_at"),
    ],
    counterparty: None,
    date_ranges: &[
        ("document_date", Field::new("t", "document_date")),
        ("due_date", Field::new("t", "due_date")),
        ("received_date", Field::new("t", "received_date")),
        ("created_at", Field::new("t", "created_at")),
    ],
    status: Some((Field::new("t", "status"), &["OPEN", "RECEIVED"])),
    sort_fields: &[
        ("document_date", Field::new("t", "document_date")),
        ("due_date", Field::new("t", "due_date")),
        ("total", Field::new("t", "total")),
        ("created_at", Field::new("t", "created_at")),
    ],
    default_sort: Field::new("t", "created_at"),
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub key: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub q: Option<String>,
    pub client_id: Option<String>,
    pub collaborator_id: Option<String>,
    pub collaborator_name: Option<String>,
    pub status: Option<String>,
    pub ranges: Vec<DateRange>,
}

impl SearchParams {
    pub fn text(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    /// Parse one `<key>_from` / `<key>_to` pair; both bounds are inclusive days.
    pub fn push_range(&mut self, key: &str, from: Option<&str>, to: Option<&str>) -> AppResult<()> {
        let from = parse_bound(key, "from", from)?;
        let to = parse_bound(key, "to", to)?;
        if from.is_none() && to.is_none() {
            return Ok(());
        }
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::BadRequest(format!(
                    "{key}_from must not be after {key}_to."
                )));
            }
        }
        self.ranges.push(DateRange {
            key: key.to_string(),
            from,
            to,
        });
        Ok(())
    }
}

fn parse_bound(key: &str, side: &str, raw: Option<&str>) -> AppResult<Option<NaiveDate>> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    parse_loose_date(raw)
        .map(Some)
        .ok_or_else(|| AppError::BadRequest(format!("{key}_{side} is not a valid date.")))
}

/// Build the filter for `profile`. `client_matches` holds the ids of clients
/// whose name or code matched the free text.
///
/// The counterparty group is OR-ed into the free-text group, so supplying a
/// counterparty widens the match instead of narrowing it.
pub fn build_filter(
    profile: &SearchProfile,
    params: &SearchParams,
    client_matches: &[String],
) -> AppResult<Predicate> {
    let mut clauses = Vec::new();
    let mut alternatives = Vec::new();

    if let Some(text) = params.text() {
        let pattern = regex::escape(text);
        alternatives.extend(text_alternatives(profile, &pattern));

        if let Some(client_field) = profile.client_field {
            if !client_matches.is_empty() {
                alternatives.push(Predicate::In {
                    field: client_field,
                    values: client_matches.to_vec(),
                });
            }
        }

        if let Some(day) = parse_loose_date(text) {
            let until = day.checked_add_days(Days::new(1));
            for field in profile.loose_date_fields {
                alternatives.push(Predicate::Range {
                    field: *field,
                    from: Some(day),
                    until,
                });
            }
        }
    }

    if let Some(group) = counterparty_group(profile, params)? {
        alternatives.push(group);
    }

    if !alternatives.is_empty() {
        clauses.push(Predicate::Any(alternatives));
    }

    if let Some(client_id) = non_empty(params.client_id.as_deref()) {
        let Some(field) = profile.client_field else {
            return Err(AppError::BadRequest(format!(
                "client_id is not a filter for {}.",
                profile.table
            )));
        };
        require_uuid(&client_id, "client_id")?;
        clauses.push(Predicate::In {
            field,
            values: vec![client_id],
        });
    }

    for range in &params.ranges {
        let Some((_, field)) = profile.date_ranges.iter().find(|(key, _)| *key == range.key) else {
            return Err(AppError::BadRequest(format!(
                "{} is not a date filter for {}.",
                range.key, profile.table
            )));
        };
        clauses.push(Predicate::Range {
            field: *field,
            from: range.from,
            until: range.to.and_then(|to| to.checked_add_days(Days::new(1))),
        });
    }

    if let Some(status) = non_empty(params.status.as_deref()) {
        let Some((field, allowed)) = profile.status else {
            return Err(AppError::BadRequest(format!(
                "status is not a filter for {}.",
                profile.table
            )));
        };
        let normalized = status.to_ascii_uppercase();
        if !allowed.contains(&normalized.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Invalid status '{status}'. Expected one of: {}.",
                allowed.join(", ")
            )));
        }
        clauses.push(Predicate::Equals {
            field,
            value: normalized,
        });
    }

    Ok(Predicate::All(clauses))
}

/// [`build_filter`] plus the client-directory lookup for the free text.
/// A failed lookup only drops the client alternative.
pub async fn resolve_filter(
    pool: &PgPool,
    profile: &SearchProfile,
    params: &SearchParams,
) -> AppResult<Predicate> {
    let mut client_matches = Vec::new();
    if let (Some(text), Some(_)) = (params.text(), profile.client_field) {
        match find_client_ids_matching(pool, &regex::escape(text)).await {
            Ok(ids) => client_matches = ids,
            Err(error) => {
                tracing::warn!(error = %error, "Client lookup for search skipped");
            }
        }
    }
    build_filter(profile, params, &client_matches)
}

fn text_alternatives(profile: &SearchProfile, pattern: &str) -> Vec<Predicate> {
    let mut alternatives = profile
        .text_fields
        .iter()
        .map(|field| Predicate::Matches {
            field: *field,
            pattern: pattern.to_string(),
        })
        .collect::<Vec<_>>();

    for embedded in profile.embedded_text {
        alternatives.push(Predicate::AnyElement {
            array: embedded.array,
            predicate: Box::new(element_text_match(embedded.keys, pattern)),
        });
    }
    alternatives
}

fn element_text_match(keys: &'static [&'static str], pattern: &str) -> Predicate {
    Predicate::Any(
        keys.iter()
            .map(|key| Predicate::Matches {
                field: Field::element(key),
                pattern: pattern.to_string(),
            })
            .collect(),
    )
}

fn counterparty_group(
    profile: &SearchProfile,
    params: &SearchParams,
) -> AppResult<Option<Predicate>> {
    let collaborator_id = non_empty(params.collaborator_id.as_deref());
    let collaborator_name = non_empty(params.collaborator_name.as_deref());
    if collaborator_id.is_none() && collaborator_name.is_none() {
        return Ok(None);
    }
    let Some(counterparty) = profile.counterparty else {
        return Err(AppError::BadRequest(format!(
            "collaborator filters are not available for {}.",
            profile.table
        )));
    };
    if let Some(id) = collaborator_id.as_deref() {
        require_uuid(id, "collaborator_id")?;
    }
    let name_pattern = collaborator_name.as_deref().map(regex::escape);

    let mut group = Vec::new();
    match counterparty {
        CounterpartyMatch::Embedded { costs, staff } => {
            if let Some(id) = collaborator_id {
                group.push(Predicate::AnyElement {
                    array: costs,
                    predicate: Box::new(Predicate::Equals {
                        field: Field::element("collaborator_id"),
                        value: id,
                    }),
                });
            }
            if let Some(pattern) = name_pattern {
                group.push(Predicate::AnyElement {
                    array: staff,
                    predicate: Box::new(Predicate::Matches {
                        field: Field::element("name"),
                        pattern: pattern.clone(),
                    }),
                });
                group.push(Predicate::AnyElement {
                    array: costs,
                    predicate: Box::new(Predicate::Matches {
                        field: Field::element("vendor_name"),
                        pattern,
                    }),
                });
            }
        }
        CounterpartyMatch::Line {
            collaborator,
            staff_name,
            vendor_name,
        } => {
            if let Some(id) = collaborator_id {
                group.push(Predicate::Equals {
                    field: collaborator,
                    value: id,
                });
            }
            if let Some(pattern) = name_pattern {
                group.push(Predicate::Matches {
                    field: staff_name,
                    pattern: pattern.clone(),
                });
                group.push(Predicate::Matches {
                    field: vendor_name,
                    pattern,
                });
            }
        }
    }
    Ok(Some(Predicate::Any(group)))
}

/// Resolve `sort`/`direction` against the profile's sortable fields.
/// Unknown keys are rejected; the default is newest first.
pub fn resolve_sort(
    profile: &SearchProfile,
    sort: Option<&str>,
    direction: Option<&str>,
) -> AppResult<(Field, bool)> {
    let field = match non_empty(sort) {
        None => profile.default_sort,
        Some(key) => profile
            .sort_fields
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, field)| *field)
            .ok_or_else(|| AppError::BadRequest(format!("Cannot sort by '{key}'.")))?,
    };
    let ascending = match non_empty(direction).map(|value| value.to_ascii_lowercase()) {
        None => false,
        Some(value) if value == "asc" => true,
        Some(value) if value == "desc" => false,
        Some(value) => {
            return Err(AppError::BadRequest(format!(
                "Invalid sort direction '{value}'."
            )))
        }
    };
    Ok((field, ascending))
}

pub fn order_clause(field: Field, ascending: bool) -> String {
    format!(
        "{} {} NULLS LAST",
        field.sql(),
        if ascending { "ASC" } else { "DESC" }
    )
}

/// Keep only the staff entries that match the free text, when any does.
/// The returned list is then not exhaustive.
pub fn narrow_staff(staff: Vec<StaffEntry>, text: &str) -> Vec<StaffEntry> {
    let predicate = element_text_match(STAFF_TEXT.keys, &regex::escape(text.trim()));
    let matching = staff
        .iter()
        .filter(|entry| {
            serde_json::to_value(entry).is_ok_and(|value| predicate.matches(&value))
        })
        .cloned()
        .collect::<Vec<_>>();
    if matching.is_empty() {
        staff
    } else {
        matching
    }
}

fn require_uuid(raw: &str, field: &str) -> AppResult<()> {
    uuid::Uuid::try_parse(raw)
        .map(|_| ())
        .map_err(|_| AppError::BadRequest(format!("{field} is not a valid id.")))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
