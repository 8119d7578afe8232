use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer};

/// Parse an amount typed by an operator. Accepts pt-BR (`1.234,56`) and
/// en-US (`1,234.56`) grouping, an optional `R$` prefix and a leading minus.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let cleaned = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|character| !character.is_whitespace())
        .collect::<String>();
    if cleaned.is_empty() {
        return None;
    }

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };
    if digits.is_empty()
        || !digits
            .chars()
            .all(|character| character.is_ascii_digit() || character == '.' || character == ',')
    {
        return None;
    }

    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                digits.replace('.', "").replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(_), None) => {
            if digits.matches(',').count() > 1 {
                digits.replace(',', "")
            } else {
                digits.replace(',', ".")
            }
        }
        (None, Some(dot)) => {
            let decimals = digits.len() - dot - 1;
            if digits.matches('.').count() > 1 || (decimals == 3 && dot > 0) {
                digits.replace('.', "")
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    };

    let parsed = normalized.parse::<f64>().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

/// `R$ 1.234,56`
pub fn format_currency(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let fraction = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}R$ {grouped},{fraction:02}")
}

/// Accepts `YYYY/MM/DD`, `YYYY-MM-DD`, `DD/MM/YYYY` and `DD-MM-YYYY`.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    const FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn format_date_opt(date: Option<NaiveDate>) -> String {
    date.map(format_date).unwrap_or_default()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(f64),
    Text(String),
}

/// Serde helper: an amount given as a JSON number or as operator-typed text.
/// `null` reads as zero.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawAmount>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(RawAmount::Number(value)) => Ok(value),
        Some(RawAmount::Text(text)) => parse_locale_number(&text)
            .ok_or_else(|| de::Error::custom(format!("invalid amount '{text}'"))),
    }
}

/// Serde helper for optional dates in any format [`parse_loose_date`] accepts.
pub fn deserialize_loose_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    parse_loose_date(&text)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("invalid date '{text}'")))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde::Deserialize;
    use serde_json::json;

    use super::{
        deserialize_amount, deserialize_loose_date, format_currency, format_date,
        parse_locale_number, parse_loose_date, round2,
    };

    #[derive(Debug, Deserialize)]
    struct Entry {
        #[serde(default, deserialize_with = "deserialize_amount")]
        value: f64,
        #[serde(default, deserialize_with = "deserialize_loose_date")]
        due_date: Option<NaiveDate>,
    }

    #[test]
    fn deserializes_typed_amounts_and_dates() {
        let entry: Entry =
            serde_json::from_value(json!({"value": "1.234,56", "due_date": "15/01/2025"}))
                .expect("entry");
        assert_eq!(entry.value, 1234.56);
        assert_eq!(entry.due_date, NaiveDate::from_ymd_opt(2025, 1, 15));

        let entry: Entry = serde_json::from_value(json!({"value": 10, "due_date": null})).expect("entry");
        assert_eq!(entry.value, 10.0);
        assert_eq!(entry.due_date, None);

        let entry: Entry = serde_json::from_value(json!({})).expect("entry");
        assert_eq!(entry.value, 0.0);

        assert!(serde_json::from_value::<Entry>(json!({"value": "ten"})).is_err());
        assert!(serde_json::from_value::<Entry>(json!({"due_date": "soon"})).is_err());
    }

    #[test]
    fn parses_brazilian_and_us_amounts() {
        assert_eq!(parse_locale_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_locale_number("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_locale_number("1234,5"), Some(1234.5));
        assert_eq!(parse_locale_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_locale_number("1234.56"), Some(1234.56));
        assert_eq!(parse_locale_number("1.234"), Some(1234.0));
        assert_eq!(parse_locale_number("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_locale_number("-50,00"), Some(-50.0));
        assert_eq!(parse_locale_number("abc"), None);
        assert_eq!(parse_locale_number(""), None);
        assert_eq!(parse_locale_number("-"), None);
    }

    #[test]
    fn formats_currency_with_grouping() {
        assert_eq!(format_currency(1234.56), "R$ 1.234,56");
        assert_eq!(format_currency(0.0), "R$ 0,00");
        assert_eq!(format_currency(1_000_000.0), "R$ 1.000.000,00");
        assert_eq!(format_currency(-12.5), "-R$ 12,50");
        assert_eq!(format_currency(999.999), "R$ 1.000,00");
    }

    #[test]
    fn parses_loose_dates() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 15);
        assert_eq!(parse_loose_date("2025/01/15"), expected);
        assert_eq!(parse_loose_date("2025-01-15"), expected);
        assert_eq!(parse_loose_date("15/01/2025"), expected);
        assert_eq!(parse_loose_date("15-01-2025"), expected);
        assert_eq!(parse_loose_date("Ana"), None);
        assert_eq!(parse_loose_date("2025/13/40"), None);
    }

    #[test]
    fn formats_dates_day_first() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).expect("valid date");
        assert_eq!(format_date(date), "09/03/2025");
    }

    #[test]
    fn rounds_to_cents() {
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(0.125), 0.13);
    }
}
