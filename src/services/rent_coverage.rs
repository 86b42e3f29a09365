//! Coverage windows: which calendar months a payment settles.

use chrono::{Datelike, NaiveDate};

use crate::periods::{add_months, due_date_for, month_start, months_between, next_month};
use crate::repository::models::{CoveragePeriod, Lease};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoverageError {
    #[error("Coverage window is empty.")]
    Empty,

    #[error(
        "Lease ends before the coverage window: {requested} month(s) requested, {available} available."
    )]
    Exhausted { requested: u32, available: u32 },
}

/// First chargeable month. A lease starting after the 1st is not billed for
/// its partial first month.
pub fn eligible_start_month(start_date: NaiveDate) -> NaiveDate {
    if start_date.day() > 1 {
        next_month(month_start(start_date))
    } else {
        month_start(start_date)
    }
}

/// Month a new payment should start covering.
///
/// The later of the eligible start month, the month after `rent_paid_until`
/// and (when `honor_next_due`) the `next_rent_due_date` month. Never at or
/// before a month already marked paid, whatever `next_rent_due_date` says.
///
/// An open invoice at or after that paid floor but before the computed start
/// pulls the start back to it, so outstanding months are settled before
/// future ones.
pub fn coverage_start(
    lease: &Lease,
    earliest_open_period: Option<NaiveDate>,
    honor_next_due: bool,
) -> NaiveDate {
    let mut floor = eligible_start_month(lease.start_date);
    if let Some(paid_until) = lease.rent_paid_until {
        floor = floor.max(next_month(month_start(paid_until)));
    }

    let mut start = floor;
    if honor_next_due {
        if let Some(next_due) = lease.next_rent_due_date {
            start = start.max(month_start(next_due));
        }
    }

    match earliest_open_period.map(month_start) {
        Some(open) if open >= floor && open < start => open,
        _ => start,
    }
}

/// Months left on the lease from `start`, or `None` for open-ended leases.
pub fn months_available(lease: &Lease, start: NaiveDate) -> Option<u32> {
    lease.end_date.map(|end_date| {
        let remaining = months_between(start, end_date) + 1;
        u32::try_from(remaining.max(0)).unwrap_or(0)
    })
}

/// `months` consecutive periods from `start`, each due on `due_day`.
///
/// Fails instead of truncating when the lease ends first.
pub fn schedule_coverage(
    lease: &Lease,
    start: NaiveDate,
    months: u32,
    due_day: u32,
) -> Result<Vec<CoveragePeriod>, CoverageError> {
    if months == 0 {
        return Err(CoverageError::Empty);
    }
    let start = month_start(start);
    if let Some(available) = months_available(lease, start) {
        if available < months {
            return Err(CoverageError::Exhausted {
                requested: months,
                available,
            });
        }
    }

    Ok((0..months)
        .map(|offset| {
            let period_start = add_months(start, offset);
            CoveragePeriod {
                period_start,
                due_date: due_date_for(period_start, due_day),
            }
        })
        .collect())
}
