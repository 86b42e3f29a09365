use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::config::AllocationPolicy;
use crate::repository::models::Payment;
use crate::repository::{LedgerStore, StoreResult};
use crate::services::payment_validation::within_tolerance;

/// The payment being checked against the tenant's recent history.
#[derive(Debug, Clone)]
pub struct DuplicateCandidate<'a> {
    pub tenant_id: &'a str,
    pub payment_id: &'a str,
    pub payment_date: DateTime<Utc>,
    pub amount: Decimal,
    pub invoice_id: Option<&'a str>,
    pub receipt_reference: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateVerdict {
    Clear,
    /// Similar payments exist; processing continues with a warning.
    Soft(Vec<String>),
    /// Same receipt reference or same target invoice; processing stops.
    Hard { payment_id: String, reason: String },
}

impl DuplicateVerdict {
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Soft(ids) if !ids.is_empty() => Some(format!(
                "Possible duplicate: similar payment(s) {} recorded within the duplicate window.",
                ids.join(", ")
            )),
            _ => None,
        }
    }
}

pub async fn detect_duplicates(
    store: &dyn LedgerStore,
    candidate: &DuplicateCandidate<'_>,
    policy: &AllocationPolicy,
) -> StoreResult<DuplicateVerdict> {
    let window = Duration::hours(policy.duplicate_window_hours);
    // Dates near the representable range clamp instead of overflowing.
    let from = candidate
        .payment_date
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let to = candidate
        .payment_date
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let recent = store
        .list_tenant_payments_between(candidate.tenant_id, from, to)
        .await?;
    Ok(classify_duplicates(candidate, &recent, policy))
}

/// Pure classification over an already-fetched payment list.
pub fn classify_duplicates(
    candidate: &DuplicateCandidate<'_>,
    others: &[Payment],
    policy: &AllocationPolicy,
) -> DuplicateVerdict {
    let window = Duration::hours(policy.duplicate_window_hours);
    let receipt = normalized(candidate.receipt_reference);
    let invoice_id = normalized(candidate.invoice_id);

    let mut soft = Vec::new();
    for other in others {
        if other.id == candidate.payment_id {
            continue;
        }
        if (other.payment_date - candidate.payment_date).abs() > window {
            continue;
        }
        if !within_tolerance(other.amount_paid, candidate.amount, policy) {
            continue;
        }

        if receipt.is_some() && normalized(other.receipt_reference.as_deref()) == receipt {
            return DuplicateVerdict::Hard {
                payment_id: other.id.clone(),
                reason: format!(
                    "Receipt reference {} was already used by payment {}.",
                    receipt.unwrap_or_default(),
                    other.id
                ),
            };
        }
        if invoice_id.is_some() && normalized(other.invoice_id.as_deref()) == invoice_id {
            return DuplicateVerdict::Hard {
                payment_id: other.id.clone(),
                reason: format!(
                    "Payment {} already targets invoice {}.",
                    other.id,
                    invoice_id.unwrap_or_default()
                ),
            };
        }
        soft.push(other.id.clone());
    }

    if soft.is_empty() {
        DuplicateVerdict::Clear
    } else {
        DuplicateVerdict::Soft(soft)
    }
}

fn normalized(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
