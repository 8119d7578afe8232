//! Paginated PDF reports.
//!
//! [`metrics`] measures and fits text, [`layout`] places rows on pages and
//! [`pdf`] writes the pages out with `lopdf`. [`documents`] turns ledger
//! data into report sections.

pub mod documents;
pub mod layout;
pub mod metrics;
pub mod pdf;

use chrono::NaiveDate;

use crate::error::AppError;
use layout::ReportDocument;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("There is nothing to report for the selected filters.")]
    Empty,
    #[error("Could not encode report: {0}")]
    Encode(String),
}

impl From<RenderError> for AppError {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::Empty => AppError::NotFound(error.to_string()),
            RenderError::Encode(_) => AppError::Internal(error.to_string()),
        }
    }
}

pub fn render(document: &ReportDocument) -> Result<Vec<u8>, RenderError> {
    let pages = layout::layout(document)?;
    let bytes = pdf::encode(&pages, &document.options, &document.title)?;
    tracing::debug!(
        title = %document.title,
        pages = pages.len(),
        bytes = bytes.len(),
        "Report rendered"
    );
    Ok(bytes)
}

/// `payables-feira-de-verao-20250115.pdf`
pub fn report_filename(kind: &str, subject: Option<&str>, date: NaiveDate) -> String {
    let mut parts = vec![slug(kind)];
    if let Some(subject) = subject.map(slug).filter(|value| !value.is_empty()) {
        parts.push(subject);
    }
    parts.push(date.format("%Y%m%d").to_string());
    format!("{}.pdf", parts.join("-"))
}

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for character in raw.chars() {
        let folded = match character {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
            'é' | 'ê' | 'è' | 'É' | 'Ê' | 'È' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'ô' | 'õ' | 'Ó' | 'Ô' | 'Õ' => 'o',
            'ú' | 'ü' | 'Ú' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            other => other.to_ascii_lowercase(),
        };
        if folded.is_ascii_alphanumeric() {
            out.push(folded);
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').chars().take(60).collect()
}
