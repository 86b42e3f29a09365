//! Allocation of a verified rent payment across one or more monthly invoices.
//!
//! A payment moves Received -> Validated -> Applied, or Received ->
//! AlreadyApplied when its idempotency markers are already on the row. All
//! checks run before the single storage transaction; nothing is written when
//! any of them fails.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AllocationPolicy;
use crate::error::AppError;
use crate::periods::{add_months, month_start, parse_period_key, period_key, period_label};
use crate::repository::models::{
    rent_invoice_id, ApplyPrepaymentCommand, ApplyPrepaymentOutcome, CoveragePeriod, Invoice,
    Lease, LeaseStatus, Payment, SettlementNotice,
};
use crate::repository::{LedgerStore, StoreError};
use crate::schemas::RentPrepaymentInput;
use crate::services::duplicate_detection::{detect_duplicates, DuplicateCandidate, DuplicateVerdict};
use crate::services::lease_pointers::sync_lease_pointers;
use crate::services::next_due::get_next_due_date;
use crate::services::payment_validation::{resolve_months, validate_amount, validate_recency};
use crate::services::rent_coverage::{coverage_start, schedule_coverage, CoverageError};

const SENTINEL_PREFIX: &str = "[rent-prepayment:";
const APPLY_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Lease {lease_id} is {status} and cannot accept rent payments.")]
    LeaseInactive { lease_id: String, status: LeaseStatus },

    #[error("Lease {0} not found.")]
    LeaseNotFound(String),

    #[error("Payment {0} not found.")]
    PaymentNotFound(String),

    #[error("Invoice {0} not found.")]
    InvoiceNotFound(String),

    #[error("{0}")]
    PaymentMismatch(String),

    #[error("Cannot cover {requested} month(s); only {available} month(s) remain on the lease.")]
    CoverageExhausted { requested: u32, available: u32 },

    #[error("Lease {0} changed while the payment was being applied; retry the request.")]
    LeaseChanged(String),

    #[error("{0}")]
    StorageTransactionFailed(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Consistency,
    Storage,
}

impl AllocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed(_)
            | Self::LeaseInactive { .. }
            | Self::CoverageExhausted { .. } => ErrorKind::Validation,
            Self::LeaseNotFound(_) | Self::PaymentNotFound(_) | Self::InvoiceNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::PaymentMismatch(_) | Self::LeaseChanged(_) => ErrorKind::Consistency,
            Self::StorageTransactionFailed(_) | Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Individual messages, one per failed check.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::ValidationFailed(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<AllocationError> for AppError {
    fn from(error: AllocationError) -> Self {
        let message = error.to_string();
        match error.kind() {
            ErrorKind::Validation => AppError::UnprocessableEntity(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Consistency => AppError::Conflict(message),
            ErrorKind::Storage => AppError::Dependency(message),
        }
    }
}

impl From<CoverageError> for AllocationError {
    fn from(error: CoverageError) -> Self {
        match error {
            CoverageError::Empty => Self::ValidationFailed(vec![error.to_string()]),
            CoverageError::Exhausted {
                requested,
                available,
            } => Self::CoverageExhausted {
                requested,
                available,
            },
        }
    }
}

/// Idempotency marker appended to `payments.notes` by a committed allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub batch_id: String,
    pub from: NaiveDate,
    pub months: u32,
}

pub fn format_sentinel(batch_id: &str, from: NaiveDate, months: u32) -> String {
    format!(
        "{SENTINEL_PREFIX}batch={batch_id};from={};months={months}]",
        period_key(from)
    )
}

pub fn parse_sentinel(notes: &str) -> Option<Sentinel> {
    let start = notes.find(SENTINEL_PREFIX)? + SENTINEL_PREFIX.len();
    let body = &notes[start..];
    let body = &body[..body.find(']')?];

    let mut batch_id = None;
    let mut from = None;
    let mut months = None;
    for pair in body.split(';') {
        match pair.split_once('=') {
            Some(("batch", value)) if !value.trim().is_empty() => {
                batch_id = Some(value.trim().to_string())
            }
            Some(("from", value)) => from = parse_period_key(value),
            Some(("months", value)) => months = value.trim().parse::<u32>().ok(),
            _ => {}
        }
    }

    Some(Sentinel {
        batch_id: batch_id?,
        from: from?,
        months: months.filter(|months| *months > 0)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepaymentReceipt {
    pub success: bool,
    pub payment_id: String,
    pub lease_id: String,
    pub months_applied: u32,
    pub applied_invoices: Vec<String>,
    pub created_invoices: Vec<String>,
    pub batch_id: Option<String>,
    pub next_due_date: Option<NaiveDate>,
    pub next_due_amount: Option<Decimal>,
    pub paid_up_to: Option<String>,
    pub warnings: Vec<String>,
    pub replayed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepaymentValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub months_paid: Option<u32>,
    pub expected_amount: Option<Decimal>,
    pub covers_months: Vec<String>,
}

struct PrepaymentContext {
    lease: Lease,
    payment: Payment,
}

/// Everything learned about a multi-month payment before mutating.
struct Assessment {
    errors: Vec<String>,
    warnings: Vec<String>,
    expected_amount: Decimal,
    coverage: Result<Vec<CoveragePeriod>, CoverageError>,
}

struct ReplayChain {
    batch_id: Option<String>,
    periods: Vec<NaiveDate>,
    invoice_ids: Vec<String>,
}

/// Allocate a verified payment to the lease's rent invoices.
///
/// Single-month payments settle the invoice they reference. Multi-month
/// payments are validated, scheduled over consecutive months and applied in
/// one storage transaction. When another payment moves the lease first, the
/// window is rescheduled from the fresh lease row. Re-running with the same
/// payment returns the recorded allocation and writes nothing.
pub async fn process_rent_prepayment(
    store: &dyn LedgerStore,
    policy: &AllocationPolicy,
    input: &RentPrepaymentInput,
    now: DateTime<Utc>,
) -> Result<PrepaymentReceipt, AllocationError> {
    let PrepaymentContext { lease, payment } = load_context(store, input).await?;

    let resolution = resolve_months(
        input.months_paid_hint,
        input.amount_paid,
        lease.monthly_rent,
        policy,
    )
    .map_err(|message| AllocationError::ValidationFailed(vec![message]))?;
    let months = resolution.months;
    let mut warnings: Vec<String> = resolution.warning.into_iter().collect();

    if months <= 1 {
        return settle_single_month(store, &lease, &payment, input, warnings).await;
    }

    if is_already_applied(&payment) {
        return replay_receipt(store, &lease, &payment, months, warnings).await;
    }

    let assessment = assess_prepayment(store, policy, &lease, &payment, input, months, now).await?;
    if !assessment.errors.is_empty() {
        return Err(AllocationError::ValidationFailed(assessment.errors));
    }
    warnings.extend(assessment.warnings);
    let mut periods = assessment.coverage?;
    let mut planned_paid_until = lease.rent_paid_until;
    let mut attempt = 1;

    let applied = loop {
        let Some(first) = periods.first().copied() else {
            return Err(CoverageError::Empty.into());
        };
        let batch_id = Uuid::new_v4().to_string();
        let command = ApplyPrepaymentCommand {
            payment_id: payment.id.clone(),
            lease_id: lease.id.clone(),
            expected_rent_paid_until: planned_paid_until,
            periods,
            monthly_rent: lease.monthly_rent,
            payment_date: input.payment_date,
            sentinel: format_sentinel(&batch_id, first.period_start, months),
            batch_id,
        };

        match store.apply_rent_prepayment(&command).await {
            Ok(ApplyPrepaymentOutcome::Applied(applied)) => break applied,
            Ok(ApplyPrepaymentOutcome::AlreadyApplied(current)) => {
                info!(
                    payment_id = %payment.id,
                    "Payment was applied concurrently; returning recorded allocation"
                );
                return replay_receipt(store, &lease, &current, months, warnings).await;
            }
            Ok(ApplyPrepaymentOutcome::LeaseMoved { rent_paid_until }) => {
                warn!(
                    payment_id = %payment.id,
                    lease_id = %lease.id,
                    attempt,
                    rent_paid_until = ?rent_paid_until,
                    "Lease moved while scheduling prepayment"
                );
                if attempt >= APPLY_ATTEMPTS {
                    return Err(AllocationError::LeaseChanged(lease.id.clone()));
                }
                attempt += 1;
                let current = store
                    .get_lease(&lease.id)
                    .await?
                    .ok_or_else(|| AllocationError::LeaseNotFound(lease.id.clone()))?;
                planned_paid_until = current.rent_paid_until;
                periods = plan_coverage(store, &current, months, policy).await??;
            }
            Err(store_error) => {
                error!(
                    payment_id = %payment.id,
                    lease_id = %lease.id,
                    error = %store_error,
                    "Rent prepayment transaction failed"
                );
                return Err(AllocationError::StorageTransactionFailed(
                    store_error.to_string(),
                ));
            }
        }
    };

    info!(
        payment_id = %payment.id,
        lease_id = %lease.id,
        months,
        batch_id = %applied.batch_id,
        method = input.method.as_deref().unwrap_or("unknown"),
        touched = applied.touched_invoice_ids.len(),
        created = applied.created_invoice_ids.len(),
        "Rent prepayment applied"
    );

    if let Err(sync_error) = sync_lease_pointers(store, &lease.id).await {
        warn!(lease_id = %lease.id, error = %sync_error, "Lease pointer repair failed");
    }

    notify_settlement(
        store,
        &lease,
        &payment,
        input.amount_paid,
        applied.covered_invoice_ids.first().cloned(),
        Some(applied.batch_id.clone()),
    )
    .await;

    let (next_due_date, next_due_amount) = project_next_due(store, &lease).await;
    let paid_up_to = applied.rent_paid_until.map(period_label);
    let message = compose_message(
        format!(
            "Payment applied to {months} month(s); rent paid up to {}.",
            paid_up_to.as_deref().unwrap_or("n/a")
        ),
        &warnings,
    );

    Ok(PrepaymentReceipt {
        success: true,
        payment_id: payment.id,
        lease_id: lease.id,
        months_applied: months,
        applied_invoices: applied.covered_invoice_ids,
        created_invoices: applied.created_invoice_ids,
        batch_id: Some(applied.batch_id),
        next_due_date,
        next_due_amount,
        paid_up_to,
        warnings,
        replayed: false,
        message,
    })
}

/// Dry run of `process_rent_prepayment`. Reports every failed check instead
/// of stopping at the first, and never writes.
pub async fn validate_prepayment_data(
    store: &dyn LedgerStore,
    policy: &AllocationPolicy,
    input: &RentPrepaymentInput,
    now: DateTime<Utc>,
) -> Result<PrepaymentValidation, AllocationError> {
    let mut report = PrepaymentValidation {
        is_valid: false,
        errors: Vec::new(),
        warnings: Vec::new(),
        months_paid: None,
        expected_amount: None,
        covers_months: Vec::new(),
    };

    let PrepaymentContext { lease, payment } = match load_context(store, input).await {
        Ok(context) => context,
        Err(AllocationError::Storage(store_error)) => return Err(store_error.into()),
        Err(other) => {
            report.errors = other.messages();
            return Ok(report);
        }
    };

    let months = match resolve_months(
        input.months_paid_hint,
        input.amount_paid,
        lease.monthly_rent,
        policy,
    ) {
        Ok(resolution) => {
            report.warnings.extend(resolution.warning);
            resolution.months
        }
        Err(message) => {
            report.errors.push(message);
            return Ok(report);
        }
    };
    report.months_paid = Some(months);

    if months <= 1 {
        report.expected_amount = Some(lease.monthly_rent);
        match single_month_invoice(store, &lease, &payment).await {
            Ok(invoice) => {
                if !invoice.status.is_open() {
                    report
                        .warnings
                        .push(format!("Invoice {} is already paid.", invoice.id));
                }
                report.covers_months.push(period_key(invoice.period_start));
            }
            Err(AllocationError::Storage(store_error)) => return Err(store_error.into()),
            Err(other) => report.errors.extend(other.messages()),
        }
        report.is_valid = report.errors.is_empty();
        return Ok(report);
    }

    if is_already_applied(&payment) {
        let chain = replay_chain(store, &lease, &payment, months).await?;
        report.expected_amount = Some(lease.monthly_rent * Decimal::from(chain.periods.len()));
        report.covers_months = chain.periods.into_iter().map(period_key).collect();
        report.warnings.push(
            "Payment has already been applied; processing returns the recorded allocation."
                .to_string(),
        );
        report.is_valid = true;
        return Ok(report);
    }

    let assessment = assess_prepayment(store, policy, &lease, &payment, input, months, now).await?;
    report.expected_amount = Some(assessment.expected_amount);
    report.errors.extend(assessment.errors);
    report.warnings.extend(assessment.warnings);
    match assessment.coverage {
        Ok(periods) => {
            report.covers_months = periods
                .iter()
                .map(|period| period_key(period.period_start))
                .collect();
        }
        Err(coverage_error) => report
            .errors
            .extend(AllocationError::from(coverage_error).messages()),
    }
    report.is_valid = report.errors.is_empty();
    Ok(report)
}

async fn load_context(
    store: &dyn LedgerStore,
    input: &RentPrepaymentInput,
) -> Result<PrepaymentContext, AllocationError> {
    let lease = store
        .get_lease(input.lease_id.trim())
        .await?
        .ok_or_else(|| AllocationError::LeaseNotFound(input.lease_id.clone()))?;
    if !lease.status.accepts_payments() {
        return Err(AllocationError::LeaseInactive {
            lease_id: lease.id,
            status: lease.status,
        });
    }

    let payment = store
        .get_payment(input.payment_id.trim())
        .await?
        .ok_or_else(|| AllocationError::PaymentNotFound(input.payment_id.clone()))?;
    if payment.tenant_id != lease.tenant_id {
        return Err(AllocationError::PaymentMismatch(format!(
            "Payment {} belongs to a different tenant than lease {}.",
            payment.id, lease.id
        )));
    }
    if input.tenant_user_id.trim() != lease.tenant_id {
        return Err(AllocationError::PaymentMismatch(format!(
            "Tenant {} is not the tenant on lease {}.",
            input.tenant_user_id.trim(),
            lease.id
        )));
    }

    Ok(PrepaymentContext { lease, payment })
}

fn is_already_applied(payment: &Payment) -> bool {
    payment.applied_to_prepayment || payment.notes.as_deref().and_then(parse_sentinel).is_some()
}

/// The rent invoice a single-month payment references, checked against the lease.
async fn single_month_invoice(
    store: &dyn LedgerStore,
    lease: &Lease,
    payment: &Payment,
) -> Result<Invoice, AllocationError> {
    let Some(invoice_id) = payment
        .invoice_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Err(AllocationError::ValidationFailed(vec![format!(
            "Payment {} does not reference a rent invoice.",
            payment.id
        )]));
    };

    let invoice = store
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AllocationError::InvoiceNotFound(invoice_id.to_string()))?;
    if !invoice.is_rent() {
        return Err(AllocationError::PaymentMismatch(format!(
            "Invoice {} is a {} invoice, not rent.",
            invoice.id, invoice.invoice_type
        )));
    }
    if invoice.lease_id != lease.id {
        return Err(AllocationError::PaymentMismatch(format!(
            "Invoice {} belongs to a different lease.",
            invoice.id
        )));
    }
    Ok(invoice)
}

/// Single-month path. Recency and duplicate checks are not applied here; the
/// invoice reference on the payment is the only gate.
async fn settle_single_month(
    store: &dyn LedgerStore,
    lease: &Lease,
    payment: &Payment,
    input: &RentPrepaymentInput,
    warnings: Vec<String>,
) -> Result<PrepaymentReceipt, AllocationError> {
    let invoice = single_month_invoice(store, lease, payment).await?;

    let settlement = store
        .settle_single_invoice(&invoice.id, input.payment_date)
        .await
        .map_err(|store_error| {
            error!(
                payment_id = %payment.id,
                invoice_id = %invoice.id,
                error = %store_error,
                "Rent invoice settlement failed"
            );
            AllocationError::StorageTransactionFailed(store_error.to_string())
        })?;

    if settlement.already_paid {
        info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            "Invoice already paid; nothing to settle"
        );
    } else {
        info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            lease_id = %lease.id,
            "Rent invoice settled"
        );
        notify_settlement(
            store,
            lease,
            payment,
            input.amount_paid,
            Some(invoice.id.clone()),
            None,
        )
        .await;
    }

    let (next_due_date, next_due_amount) = project_next_due(store, lease).await;
    let paid_up_to = settlement.rent_paid_until.map(period_label);
    let headline = if settlement.already_paid {
        format!(
            "Invoice for {} was already paid.",
            period_label(invoice.period_start)
        )
    } else {
        format!(
            "Payment applied to {}.",
            period_label(invoice.period_start)
        )
    };

    Ok(PrepaymentReceipt {
        success: true,
        payment_id: payment.id.clone(),
        lease_id: lease.id.clone(),
        months_applied: 1,
        applied_invoices: vec![invoice.id],
        created_invoices: Vec::new(),
        batch_id: None,
        next_due_date,
        next_due_amount,
        paid_up_to,
        message: compose_message(headline, &warnings),
        warnings,
        replayed: settlement.already_paid,
    })
}

async fn assess_prepayment(
    store: &dyn LedgerStore,
    policy: &AllocationPolicy,
    lease: &Lease,
    payment: &Payment,
    input: &RentPrepaymentInput,
    months: u32,
    now: DateTime<Utc>,
) -> Result<Assessment, AllocationError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Err(message) = validate_recency(input.payment_date, now, policy) {
        errors.push(message);
    }

    let candidate = DuplicateCandidate {
        tenant_id: &lease.tenant_id,
        payment_id: &payment.id,
        payment_date: input.payment_date,
        amount: input.amount_paid,
        invoice_id: payment.invoice_id.as_deref(),
        receipt_reference: payment.receipt_reference.as_deref(),
    };
    match detect_duplicates(store, &candidate, policy).await? {
        DuplicateVerdict::Hard {
            payment_id: duplicate_of,
            reason,
        } => {
            warn!(
                payment_id = %payment.id,
                duplicate_of = %duplicate_of,
                "Duplicate payment rejected"
            );
            errors.push(reason);
        }
        verdict @ DuplicateVerdict::Soft(_) => {
            if let Some(warning) = verdict.warning() {
                warn!(payment_id = %payment.id, "{warning}");
                warnings.push(warning);
            }
        }
        DuplicateVerdict::Clear => {}
    }

    let expected_amount = lease.monthly_rent * Decimal::from(months);
    match validate_amount(input.amount_paid, months, lease.monthly_rent, policy) {
        Ok(warning) => warnings.extend(warning),
        Err(message) => errors.push(message),
    }

    if months > policy.very_large_prepayment_months {
        warnings.push(format!(
            "Very large prepayment: {months} months. Confirm with the tenant."
        ));
    } else if months > policy.large_prepayment_months {
        warnings.push(format!("Large prepayment: {months} months."));
    }

    let coverage = plan_coverage(store, lease, months, policy).await?;

    Ok(Assessment {
        errors,
        warnings,
        expected_amount,
        coverage,
    })
}

/// Consecutive months `months` would cover on `lease` as it stands now.
async fn plan_coverage(
    store: &dyn LedgerStore,
    lease: &Lease,
    months: u32,
    policy: &AllocationPolicy,
) -> Result<Result<Vec<CoveragePeriod>, CoverageError>, StoreError> {
    let earliest_open = store
        .list_open_rent_invoices(&lease.id)
        .await?
        .iter()
        .map(|invoice| invoice.period_start)
        .min();
    let start = coverage_start(lease, earliest_open, true);
    Ok(schedule_coverage(lease, start, months, policy.rent_due_day))
}

/// Rebuild the invoice chain a previous allocation of `payment` produced.
async fn replay_chain(
    store: &dyn LedgerStore,
    lease: &Lease,
    payment: &Payment,
    resolved_months: u32,
) -> Result<ReplayChain, AllocationError> {
    let (batch_id, from, months) = match payment.notes.as_deref().and_then(parse_sentinel) {
        Some(sentinel) => (Some(sentinel.batch_id), sentinel.from, sentinel.months),
        None => {
            let linked_period = match payment.invoice_id.as_deref() {
                Some(invoice_id) => store
                    .get_invoice(invoice_id)
                    .await?
                    .filter(|invoice| invoice.lease_id == lease.id)
                    .map(|invoice| invoice.period_start),
                None => None,
            };
            let months = payment
                .months_paid
                .and_then(|months| u32::try_from(months).ok())
                .filter(|months| *months > 0)
                .unwrap_or(resolved_months);
            (
                payment.batch_id.clone(),
                linked_period.unwrap_or_else(|| month_start(payment.payment_date.date_naive())),
                months,
            )
        }
    };

    let periods: Vec<NaiveDate> = (0..months).map(|offset| add_months(from, offset)).collect();
    let last = periods.last().copied().unwrap_or(from);
    let stored: HashMap<NaiveDate, String> = store
        .list_rent_invoices_in_range(&lease.id, from, last)
        .await?
        .into_iter()
        .map(|invoice| (invoice.period_start, invoice.id))
        .collect();
    let invoice_ids = periods
        .iter()
        .map(|period| {
            stored
                .get(period)
                .cloned()
                .unwrap_or_else(|| rent_invoice_id(&lease.id, *period))
        })
        .collect();

    Ok(ReplayChain {
        batch_id,
        periods,
        invoice_ids,
    })
}

async fn replay_receipt(
    store: &dyn LedgerStore,
    lease: &Lease,
    payment: &Payment,
    resolved_months: u32,
    warnings: Vec<String>,
) -> Result<PrepaymentReceipt, AllocationError> {
    let chain = replay_chain(store, lease, payment, resolved_months).await?;
    info!(
        payment_id = %payment.id,
        lease_id = %lease.id,
        months = chain.periods.len(),
        "Prepayment already applied; returning recorded allocation"
    );

    let current = store.get_lease(&lease.id).await?.unwrap_or_else(|| lease.clone());
    let (next_due_date, next_due_amount) = project_next_due(store, &current).await;
    let paid_up_to = current.rent_paid_until.map(period_label);
    let message = compose_message(
        format!(
            "Payment was already applied to {} month(s); no changes made.",
            chain.periods.len()
        ),
        &warnings,
    );

    Ok(PrepaymentReceipt {
        success: true,
        payment_id: payment.id.clone(),
        lease_id: lease.id.clone(),
        months_applied: u32::try_from(chain.periods.len()).unwrap_or(u32::MAX),
        applied_invoices: chain.invoice_ids,
        created_invoices: Vec::new(),
        batch_id: chain.batch_id,
        next_due_date,
        next_due_amount,
        paid_up_to,
        warnings,
        replayed: true,
        message,
    })
}

async fn notify_settlement(
    store: &dyn LedgerStore,
    lease: &Lease,
    payment: &Payment,
    amount: Decimal,
    invoice_id: Option<String>,
    batch_id: Option<String>,
) {
    let notice = SettlementNotice {
        tenant_id: lease.tenant_id.clone(),
        payment_id: payment.id.clone(),
        invoice_id,
        amount,
        receipt_reference: payment.receipt_reference.clone(),
        batch_id,
    };
    if let Err(notice_error) = store.enqueue_settlement_notice(&notice).await {
        warn!(
            payment_id = %payment.id,
            error = %notice_error,
            "Could not queue payment settled notice"
        );
    }
}

async fn project_next_due(
    store: &dyn LedgerStore,
    lease: &Lease,
) -> (Option<NaiveDate>, Option<Decimal>) {
    match get_next_due_date(store, &lease.id).await {
        Ok(summary) => (summary.next_due_date, summary.next_amount),
        Err(projection_error) => {
            warn!(lease_id = %lease.id, error = %projection_error, "Next due projection failed");
            (lease.next_rent_due_date, Some(lease.monthly_rent))
        }
    }
}

fn compose_message(headline: String, warnings: &[String]) -> String {
    if warnings.is_empty() {
        headline
    } else {
        format!("{headline} Warnings: {}", warnings.join(" "))
    }
}
