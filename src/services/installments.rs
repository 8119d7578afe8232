use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const MAX_INSTALLMENTS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceivableStatus {
    Open,
    Received,
}

impl ReceivableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Received => "RECEIVED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub value: f64,
    pub due_date: NaiveDate,
    pub status: ReceivableStatus,
    #[serde(default)]
    pub paid_date: Option<NaiveDate>,
}

/// Split `total` into `count` monthly installments starting at `first_due`.
///
/// The split is done in whole cents: every installment gets
/// `cents / count` and the last one also takes `cents % count`, so the plan
/// sums to `total` and no installment goes negative. Due dates
/// are offset from `first_due` (not chained), so a plan starting on the
/// 31st clamps to the month's end without drifting.
pub fn build_installments(total: f64, count: u32, first_due: NaiveDate) -> AppResult<Vec<Installment>> {
    if !total.is_finite() || total < 0.0 {
        return Err(AppError::BadRequest(
            "total must be a finite, non-negative amount.".to_string(),
        ));
    }
    if count == 0 || count > MAX_INSTALLMENTS {
        return Err(AppError::BadRequest(format!(
            "installment_count must be between 1 and {MAX_INSTALLMENTS}."
        )));
    }

    let cents = (total * 100.0).round() as u64;
    let base = cents / u64::from(count);
    let remainder = cents % u64::from(count);
    let mut plan = Vec::with_capacity(count as usize);
    for number in 1..=count {
        let due_date = first_due
            .checked_add_months(Months::new(number - 1))
            .ok_or_else(|| AppError::BadRequest("first_due_date is out of range.".to_string()))?;
        let share = if number == count { base + remainder } else { base };
        plan.push(Installment {
            number,
            value: share as f64 / 100.0,
            due_date,
            status: ReceivableStatus::Open,
            paid_date: None,
        });
    }
    Ok(plan)
}

/// RECEIVED iff the plan is non-empty and every installment is RECEIVED.
pub fn derive_aggregate_status(installments: &[Installment]) -> ReceivableStatus {
    if !installments.is_empty()
        && installments
            .iter()
            .all(|installment| installment.status == ReceivableStatus::Received)
    {
        ReceivableStatus::Received
    } else {
        ReceivableStatus::Open
    }
}

/// With a plan the aggregate decides; without one the explicit status does.
pub fn effective_status(explicit: ReceivableStatus, installments: &[Installment]) -> ReceivableStatus {
    if installments.is_empty() {
        explicit
    } else {
        derive_aggregate_status(installments)
    }
}

/// Mark one installment and return the plan's new aggregate status.
pub fn set_installment_status(
    plan: &mut [Installment],
    number: u32,
    status: ReceivableStatus,
    paid_date: Option<NaiveDate>,
) -> AppResult<ReceivableStatus> {
    let installment = plan
        .iter_mut()
        .find(|installment| installment.number == number)
        .ok_or_else(|| AppError::NotFound(format!("Installment {number} not found.")))?;

    installment.status = status;
    installment.paid_date = match status {
        ReceivableStatus::Received => paid_date,
        ReceivableStatus::Open => None,
    };
    Ok(derive_aggregate_status(plan))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receivable {
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub action_ids: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub installments: Vec<Installment>,
    #[serde(default)]
    pub document_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub received_date: Option<NaiveDate>,
    pub status: ReceivableStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Receivable {
    pub fn effective_status(&self) -> ReceivableStatus {
        effective_status(self.status, &self.installments)
    }

    pub fn received_count(&self) -> usize {
        self.installments
            .iter()
            .filter(|installment| installment.status == ReceivableStatus::Received)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        build_installments, derive_aggregate_status, effective_status, set_installment_status,
        ReceivableStatus,
    };
    use crate::error::AppError;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn splits_evenly_with_monthly_due_dates() {
        let plan = build_installments(1000.0, 4, date(2025, 1, 1)).expect("plan");
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|installment| installment.value == 250.0));
        assert!(plan
            .iter()
            .all(|installment| installment.status == ReceivableStatus::Open));
        assert_eq!(
            plan.iter().map(|installment| installment.number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(
            plan.iter().map(|installment| installment.due_date).collect::<Vec<_>>(),
            vec![date(2025, 1, 1), date(2025, 2, 1), date(2025, 3, 1), date(2025, 4, 1)]
        );
    }

    #[test]
    fn remainder_lands_on_last_installment() {
        let plan = build_installments(100.0, 3, date(2025, 1, 10)).expect("plan");
        let values = plan.iter().map(|installment| installment.value).collect::<Vec<_>>();
        assert_eq!(values, vec![33.33, 33.33, 33.34]);
        let sum: f64 = values.iter().sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn small_totals_never_produce_negative_installments() {
        let plan = build_installments(0.35, 20, date(2025, 1, 1)).expect("plan");
        let cents = plan
            .iter()
            .map(|installment| (installment.value * 100.0).round() as i64)
            .collect::<Vec<_>>();
        assert!(cents[..19].iter().all(|value| *value == 1));
        assert_eq!(cents[19], 16);
        assert_eq!(cents.iter().sum::<i64>(), 35);
    }

    #[test]
    fn long_plans_keep_the_remainder_in_whole_cents() {
        let plan = build_installments(200.0, 120, date(2025, 1, 1)).expect("plan");
        assert!(plan[..119].iter().all(|installment| installment.value == 1.66));
        assert_eq!(plan[119].value, 2.46);
        assert!(plan.iter().all(|installment| installment.value >= 0.0));
        let total: i64 = plan
            .iter()
            .map(|installment| (installment.value * 100.0).round() as i64)
            .sum();
        assert_eq!(total, 20_000);
    }

    #[test]
    fn month_end_dates_clamp_without_drifting() {
        let plan = build_installments(300.0, 3, date(2025, 1, 31)).expect("plan");
        assert_eq!(
            plan.iter().map(|installment| installment.due_date).collect::<Vec<_>>(),
            vec![date(2025, 1, 31), date(2025, 2, 28), date(2025, 3, 31)]
        );
    }

    #[test]
    fn rejects_bad_plans() {
        assert!(matches!(
            build_installments(100.0, 0, date(2025, 1, 1)),
            Err(AppError::BadRequest(_))
        ));
        assert!(build_installments(f64::NAN, 2, date(2025, 1, 1)).is_err());
        assert!(build_installments(-1.0, 2, date(2025, 1, 1)).is_err());
    }

    #[test]
    fn aggregate_follows_every_installment() {
        assert_eq!(derive_aggregate_status(&[]), ReceivableStatus::Open);

        let mut plan = build_installments(1000.0, 4, date(2025, 1, 1)).expect("plan");
        for number in 1..=3 {
            let status = set_installment_status(
                &mut plan,
                number,
                ReceivableStatus::Received,
                Some(date(2025, 1, 5)),
            )
            .expect("update");
            assert_eq!(status, ReceivableStatus::Open);
        }
        let status =
            set_installment_status(&mut plan, 4, ReceivableStatus::Received, None).expect("update");
        assert_eq!(status, ReceivableStatus::Received);

        let status =
            set_installment_status(&mut plan, 2, ReceivableStatus::Open, None).expect("update");
        assert_eq!(status, ReceivableStatus::Open);
        assert_eq!(plan[1].paid_date, None);
    }

    #[test]
    fn unknown_installment_is_not_found() {
        let mut plan = build_installments(10.0, 1, date(2025, 1, 1)).expect("plan");
        assert!(matches!(
            set_installment_status(&mut plan, 7, ReceivableStatus::Received, None),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn explicit_status_applies_only_without_a_plan() {
        assert_eq!(
            effective_status(ReceivableStatus::Received, &[]),
            ReceivableStatus::Received
        );
        let plan = build_installments(10.0, 2, date(2025, 1, 1)).expect("plan");
        assert_eq!(
            effective_status(ReceivableStatus::Received, &plan),
            ReceivableStatus::Open
        );
    }
}
