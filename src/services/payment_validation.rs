use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::AllocationPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct MonthsResolution {
    pub months: u32,
    pub warning: Option<String>,
}

pub fn validate_recency(
    payment_date: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &AllocationPolicy,
) -> Result<(), String> {
    if payment_date > now {
        return Err("Payment date cannot be in the future.".to_string());
    }
    if now - payment_date > Duration::days(policy.max_payment_age_days) {
        return Err(format!(
            "Payment date is more than {} days old.",
            policy.max_payment_age_days
        ));
    }
    Ok(())
}

/// Check `amount_paid` against `monthly_rent × months`.
///
/// Outside the tolerance band is an error. Inside the band with a nonzero
/// delta passes with an over/underpayment warning; the full amount is still
/// allocated by the caller.
pub fn validate_amount(
    amount_paid: Decimal,
    months: u32,
    monthly_rent: Decimal,
    policy: &AllocationPolicy,
) -> Result<Option<String>, String> {
    if months == 0 {
        return Err("Months paid must be at least 1.".to_string());
    }
    let expected = monthly_rent * Decimal::from(months);
    if expected <= Decimal::ZERO {
        return Err("Expected amount must be greater than zero.".to_string());
    }

    let delta = amount_paid - expected;
    let variance_percent = (delta.abs() / expected * Decimal::ONE_HUNDRED).round_dp(2);
    if !within_tolerance(amount_paid, expected, policy) {
        return Err(format!(
            "Amount paid {} differs from expected {} for {months} month(s) by {variance_percent}%, \
             outside the allowed {}%.",
            amount_paid.round_dp(2),
            expected.round_dp(2),
            policy.amount_tolerance_percent
        ));
    }

    Ok(if delta > Decimal::ZERO {
        Some(format!(
            "Overpayment of {} ({variance_percent}%) accepted within tolerance.",
            delta.round_dp(2)
        ))
    } else if delta < Decimal::ZERO {
        Some(format!(
            "Underpayment of {} ({variance_percent}%) accepted within tolerance.",
            delta.abs().round_dp(2)
        ))
    } else {
        None
    })
}

/// Month count implied by the amount, if it lands inside the tolerance band.
pub fn infer_months_from_amount(
    amount_paid: Decimal,
    monthly_rent: Decimal,
    policy: &AllocationPolicy,
) -> Option<u32> {
    if monthly_rent <= Decimal::ZERO || amount_paid <= Decimal::ZERO {
        return None;
    }
    let months = round_months(amount_paid / monthly_rent)?;
    if months == 0 {
        return None;
    }
    let expected = monthly_rent * Decimal::from(months);
    within_tolerance(amount_paid, expected, policy).then_some(months)
}

/// Authoritative month count: `max(1, round(hint or amount / rent))`, then
/// overridden by the amount-inferred count when the two disagree. Counts
/// above `policy.max_prepayment_months` are rejected either way.
pub fn resolve_months(
    months_hint: Option<u32>,
    amount_paid: Decimal,
    monthly_rent: Decimal,
    policy: &AllocationPolicy,
) -> Result<MonthsResolution, String> {
    if monthly_rent <= Decimal::ZERO {
        return Err("Lease monthly rent must be greater than zero.".to_string());
    }
    if amount_paid <= Decimal::ZERO {
        return Err("Payment amount must be greater than zero.".to_string());
    }

    let base = match months_hint.filter(|hint| *hint > 0) {
        Some(hint) => hint,
        None => round_months(amount_paid / monthly_rent).unwrap_or(1),
    }
    .max(1);

    let resolution = match infer_months_from_amount(amount_paid, monthly_rent, policy) {
        Some(inferred) if inferred != base => MonthsResolution {
            months: inferred,
            warning: Some(format!(
                "Months paid adjusted from {base} to {inferred} to match the amount paid."
            )),
        },
        _ => MonthsResolution {
            months: base,
            warning: None,
        },
    };

    if resolution.months > policy.max_prepayment_months {
        return Err(format!(
            "Payment covers {} months; at most {} months can be prepaid at once.",
            resolution.months, policy.max_prepayment_months
        ));
    }
    Ok(resolution)
}

/// `|amount - expected| <= expected × tolerance`.
pub fn within_tolerance(amount: Decimal, expected: Decimal, policy: &AllocationPolicy) -> bool {
    (amount - expected).abs() <= expected * policy.tolerance_ratio()
}

fn round_months(ratio: Decimal) -> Option<u32> {
    ratio
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u32()
}
