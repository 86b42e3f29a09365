//! Storage contract for leases, rent invoices and payments.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::models::{
    ApplyPrepaymentCommand, ApplyPrepaymentOutcome, Invoice, Lease, LeaseCursor, NewRentInvoice,
    Payment, SettlementNotice, SingleSettlement,
};
use crate::error::AppError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Row decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Unavailable(String),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => AppError::NotFound(format!("{what} not found.")),
            StoreError::Conflict(message) => AppError::Conflict(message),
            other => AppError::Dependency(other.to_string()),
        }
    }
}

/// Persistence operations the allocation engine relies on.
///
/// Implementations:
/// - `PgLedgerStore`: PostgreSQL, one database transaction per mutating call
/// - `MemoryLedgerStore`: in-memory, test only
///
/// `apply_rent_prepayment` and `settle_single_invoice` must be all-or-nothing.
/// `advance_lease_pointers` and `set_next_rent_due_date` never move a pointer
/// backwards.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_lease(&self, lease_id: &str) -> StoreResult<Option<Lease>>;

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>>;

    async fn get_payment(&self, payment_id: &str) -> StoreResult<Option<Payment>>;

    /// Unpaid, overdue and partially-paid rent invoices ordered by due date.
    async fn list_open_rent_invoices(&self, lease_id: &str) -> StoreResult<Vec<Invoice>>;

    /// Rent invoices with `from <= period_start <= to`, ordered by period.
    async fn list_rent_invoices_in_range(
        &self,
        lease_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<Invoice>>;

    /// Most recent paid rent invoice with `period_start >= not_before`.
    async fn latest_paid_rent_invoice(
        &self,
        lease_id: &str,
        not_before: NaiveDate,
    ) -> StoreResult<Option<Invoice>>;

    async fn count_paid_rent_invoices(&self, lease_id: &str) -> StoreResult<i64>;

    /// Payments for `tenant_id` dated within `[from, to]`.
    async fn list_tenant_payments_between(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>>;

    /// Up to `limit` active leases ordered by `(start_date, id)`, strictly
    /// after `after` when given, optionally restricted to `lease_ids`.
    async fn list_active_leases(
        &self,
        lease_ids: Option<&[String]>,
        after: Option<&LeaseCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Lease>>;

    /// Create missing invoices, mark the window paid, advance the lease and
    /// flag the payment, as one transaction guarded by the payment and lease
    /// rows. Returns `LeaseMoved` without writing when the locked lease no
    /// longer matches `expected_rent_paid_until` or no invoice in the window
    /// is still open.
    async fn apply_rent_prepayment(
        &self,
        command: &ApplyPrepaymentCommand,
    ) -> StoreResult<ApplyPrepaymentOutcome>;

    /// Mark one invoice paid and advance the lease by that period. No-op when
    /// the invoice is already paid.
    async fn settle_single_invoice(
        &self,
        invoice_id: &str,
        payment_date: DateTime<Utc>,
    ) -> StoreResult<SingleSettlement>;

    /// Returns `true` when either pointer moved.
    async fn advance_lease_pointers(
        &self,
        lease_id: &str,
        rent_paid_until: NaiveDate,
        next_rent_due_date: NaiveDate,
    ) -> StoreResult<bool>;

    /// Insert an unpaid rent invoice. `None` when the (lease, type, period)
    /// row already exists.
    async fn upsert_rent_invoice(&self, invoice: &NewRentInvoice) -> StoreResult<Option<Invoice>>;

    async fn set_next_rent_due_date(&self, lease_id: &str, next_due: NaiveDate)
        -> StoreResult<bool>;

    /// Flip unpaid rent invoices due before `today` to overdue.
    async fn mark_overdue_invoices(&self, today: NaiveDate) -> StoreResult<u64>;

    async fn enqueue_settlement_notice(&self, notice: &SettlementNotice) -> StoreResult<()>;
}
