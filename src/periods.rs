//! Calendar-month helpers. A billing period is always represented by the
//! first day of its month.

use chrono::{Datelike, Months, NaiveDate};

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn add_months(period: NaiveDate, months: u32) -> NaiveDate {
    month_start(period)
        .checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

pub fn next_month(period: NaiveDate) -> NaiveDate {
    add_months(period, 1)
}

pub fn days_in_month(period: NaiveDate) -> u32 {
    let first = month_start(period);
    let following = next_month(first);
    (following - first).num_days() as u32
}

/// Due date inside `period`, with `due_day` shortened for short months.
pub fn due_date_for(period: NaiveDate, due_day: u32) -> NaiveDate {
    let first = month_start(period);
    let day = due_day.clamp(1, days_in_month(first));
    first.with_day(day).unwrap_or(first)
}

/// Number of whole months from `from` to `to` (both month-normalized).
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let from = month_start(from);
    let to = month_start(to);
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}

/// `YYYY-MM` key.
pub fn period_key(period: NaiveDate) -> String {
    period.format("%Y-%m").to_string()
}

pub fn parse_period_key(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d").ok()
}

/// Human label, e.g. `March 2026`.
pub fn period_label(period: NaiveDate) -> String {
    period.format("%B %Y").to_string()
}
