use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::layout::{Column, LayoutOptions, ReportDocument, ReportRow, Section};
use crate::services::{
    installments::Receivable,
    ledger::{LedgerLine, LineKind, LineStatus},
    linker::CounterpartyView,
    money::{format_currency, format_date, format_date_opt},
};

/// One ledger line with the labels a report row needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PayableEntry {
    pub line: LedgerLine,
    pub action_name: String,
    pub client_name: Option<String>,
    pub counterparty: Option<CounterpartyView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCost {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub status: LineStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivableEntry {
    pub receivable: Receivable,
    pub client_name: Option<String>,
}

/// "Project costs" then "Fixed costs"; a `None` slice leaves that section
/// out of the document and out of the grand total.
pub fn payables_document(
    title: String,
    subtitle: Option<String>,
    project: Option<&[PayableEntry]>,
    fixed: Option<&[FixedCost]>,
    options: LayoutOptions,
) -> ReportDocument {
    let project_section = Section {
        title: "Project costs".to_string(),
        columns: vec![
            Column::value("Date", 50.0),
            Column::text("Action", 105.0),
            Column::text("Payee", 105.0),
            Column::text("Bank / PIX", 105.0),
            Column::value("Method", 48.0),
            Column::value("Status", 40.0),
            Column::amount("Amount", 70.0),
        ],
        rows: project
            .unwrap_or_default()
            .iter()
            .map(project_row)
            .collect(),
        included: project.is_some(),
    };

    let fixed_section = Section {
        title: "Fixed costs".to_string(),
        columns: vec![
            Column::value("Due", 50.0),
            Column::text("Description", 283.0),
            Column::value("Status", 60.0),
            Column::amount("Amount", 130.0),
        ],
        rows: fixed.unwrap_or_default().iter().map(fixed_row).collect(),
        included: fixed.is_some(),
    };

    ReportDocument {
        title,
        subtitle,
        sections: vec![project_section, fixed_section],
        options,
    }
}

pub fn receivables_document(
    title: String,
    subtitle: Option<String>,
    entries: &[ReceivableEntry],
    options: LayoutOptions,
) -> ReportDocument {
    let section = Section {
        title: "Receivables".to_string(),
        columns: vec![
            Column::value("Document", 50.0),
            Column::text("Client", 100.0),
            Column::text("Description", 150.0),
            Column::value("Installments", 60.0),
            Column::value("Due", 50.0),
            Column::value("Status", 50.0),
            Column::amount("Amount", 63.0),
        ],
        rows: entries.iter().map(receivable_row).collect(),
        included: true,
    };
    ReportDocument {
        title,
        subtitle,
        sections: vec![section],
        options,
    }
}

fn project_row(entry: &PayableEntry) -> ReportRow {
    let line = &entry.line;
    let action = match entry.client_name.as_deref() {
        Some(client) => format!("{} / {client}", entry.action_name),
        None => entry.action_name.clone(),
    };

    let (payee, inline_bank, inline_pix) = match &line.kind {
        LineKind::Staff { name, pix, bank } => (name.clone(), bank.clone(), pix.clone()),
        LineKind::Cost {
            description,
            vendor_name,
            ..
        } => {
            let vendor = vendor_name
                .clone()
                .or_else(|| entry.counterparty.as_ref().map(|view| view.name.clone()));
            let payee = match vendor {
                Some(vendor) => format!("{description} ({vendor})"),
                None => description.clone(),
            };
            (payee, None, None)
        }
    };
    let bank = inline_bank.or_else(|| entry.counterparty.as_ref().and_then(|view| view.bank.clone()));
    let pix = inline_pix.or_else(|| entry.counterparty.as_ref().and_then(|view| view.pix.clone()));
    let banking = [bank, pix.map(|key| format!("PIX {key}"))]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

    ReportRow {
        cells: vec![
            format_date(line.report_date),
            action,
            payee,
            banking,
            line.payment_method.clone().unwrap_or_default(),
            line.status.as_str().to_string(),
            format_currency(line.value),
        ],
        amount: line.value,
    }
}

fn fixed_row(cost: &FixedCost) -> ReportRow {
    ReportRow {
        cells: vec![
            format_date_opt(cost.due_date),
            cost.description.clone(),
            cost.status.as_str().to_string(),
            format_currency(cost.value),
        ],
        amount: cost.value,
    }
}

fn receivable_row(entry: &ReceivableEntry) -> ReportRow {
    let receivable = &entry.receivable;
    let installments = if receivable.installments.is_empty() {
        String::new()
    } else {
        format!(
            "{}/{}",
            receivable.received_count(),
            receivable.installments.len()
        )
    };
    ReportRow {
        cells: vec![
            format_date_opt(receivable.document_date),
            entry
                .client_name
                .clone()
                .or_else(|| receivable.client_id.clone())
                .unwrap_or_default(),
            receivable.description.clone(),
            installments,
            format_date_opt(receivable.due_date),
            receivable.effective_status().as_str().to_string(),
            format_currency(receivable.total),
        ],
        amount: receivable.total,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{payables_document, receivables_document, FixedCost, PayableEntry, ReceivableEntry};
    use crate::services::{
        installments::{build_installments, Receivable, ReceivableStatus},
        ledger::{LedgerLine, LineKind, LineStatus},
        linker::{CounterpartyView, MatchSource},
        report::layout::LayoutOptions,
    };

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).expect("date")
    }

    fn line(kind: LineKind, value: f64) -> LedgerLine {
        LedgerLine {
            id: "p1".to_string(),
            action_id: "a1".to_string(),
            kind,
            value,
            payment_method: Some("PIX".to_string()),
            due_date: None,
            report_date: date(),
            status: LineStatus::Open,
            paid_at: None,
            created_at: None,
        }
    }

    fn entries() -> Vec<PayableEntry> {
        vec![
            PayableEntry {
                line: line(
                    LineKind::Staff {
                        name: "Ana".to_string(),
                        pix: None,
                        bank: None,
                    },
                    100.0,
                ),
                action_name: "Feira".to_string(),
                client_name: Some("Acme".to_string()),
                counterparty: Some(CounterpartyView {
                    id: "c".to_string(),
                    name: "Ana".to_string(),
                    company: None,
                    bank: Some("Banco 1".to_string()),
                    pix: Some("ana@pix".to_string()),
                    matched_by: MatchSource::Name,
                }),
            },
            PayableEntry {
                line: line(
                    LineKind::Cost {
                        cost_id: "c1".to_string(),
                        description: "Som".to_string(),
                        collaborator_id: None,
                        vendor_name: Some("Audio Ltda".to_string()),
                        vendor_company: None,
                    },
                    50.0,
                ),
                action_name: "Feira".to_string(),
                client_name: None,
                counterparty: None,
            },
        ]
    }

    #[test]
    fn project_rows_fall_back_to_directory_banking() {
        let entries = entries();
        let document = payables_document(
            "Payables".to_string(),
            None,
            Some(entries.as_slice()),
            None,
            LayoutOptions::default(),
        );
        let project = &document.sections[0];
        assert_eq!(project.rows[0].cells[1], "Feira / Acme");
        assert_eq!(project.rows[0].cells[3], "Banco 1, PIX ana@pix");
        assert_eq!(project.rows[1].cells[2], "Som (Audio Ltda)");
        assert_eq!(project.rows[1].cells[6], "R$ 50,00");
        assert!(!document.sections[1].included);
        assert_eq!(document.grand_total(), 150.0);
    }

    #[test]
    fn toggled_sections_drive_the_grand_total() {
        let entries = entries();
        let fixed = vec![FixedCost {
            id: "f1".to_string(),
            description: "Aluguel".to_string(),
            value: 1000.0,
            due_date: Some(date()),
            status: LineStatus::Open,
        }];
        let both = payables_document(
            "Payables".to_string(),
            None,
            Some(entries.as_slice()),
            Some(fixed.as_slice()),
            LayoutOptions::default(),
        );
        assert_eq!(both.grand_total(), 1150.0);

        let fixed_only = payables_document(
            "Payables".to_string(),
            None,
            None,
            Some(fixed.as_slice()),
            LayoutOptions::default(),
        );
        assert_eq!(fixed_only.grand_total(), 1000.0);
        assert!(!fixed_only.sections[0].included);
    }

    #[test]
    fn receivable_rows_show_plan_progress() {
        let mut installments = build_installments(1000.0, 4, date()).expect("plan");
        installments[0].status = ReceivableStatus::Received;
        let entry = ReceivableEntry {
            receivable: Receivable {
                id: "r1".to_string(),
                client_id: Some("550e8400-e29b-41d4-a716-446655440000".to_string()),
                action_ids: vec!["a1".to_string()],
                description: "Feira".to_string(),
                total: 1000.0,
                recurring: false,
                installments,
                document_date: Some(date()),
                due_date: None,
                received_date: None,
                status: ReceivableStatus::Received,
                created_at: None,
            },
            client_name: Some("Acme".to_string()),
        };
        let document = receivables_document("Receivables".to_string(), None, &[entry], LayoutOptions::default());
        let cells = &document.sections[0].rows[0].cells;
        assert_eq!(cells[1], "Acme");
        assert_eq!(cells[3], "1/4");
        assert_eq!(cells[5], "OPEN");
    }
}
