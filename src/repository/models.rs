use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const RENT_INVOICE_TYPE: &str = "rent";

const INVOICE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2b0e_8c3a_4e5f_9a71_03c4_d5e6_f701);

/// Deterministic id for the rent invoice of `lease_id` in `period_start`.
///
/// The same (lease, period) pair always yields the same id, so a replayed
/// prepayment can rebuild its invoice chain without extra bookkeeping.
pub fn rent_invoice_id(lease_id: &str, period_start: NaiveDate) -> String {
    let name = format!("{}:{RENT_INVOICE_TYPE}:{}", lease_id.trim(), period_start);
    Uuid::new_v5(&INVOICE_ID_NAMESPACE, name.as_bytes()).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Pending,
    Active,
    Ended,
    Expired,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Expired => "expired",
        }
    }

    pub fn accepts_payments(self) -> bool {
        matches!(self, Self::Active | Self::Pending)
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    /// Still owed: unpaid, overdue or partially paid.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Paid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub tenant_id: String,
    pub monthly_rent: Decimal,
    pub status: LeaseStatus,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub rent_paid_until: Option<NaiveDate>,
    #[serde(default)]
    pub next_rent_due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub lease_id: String,
    pub invoice_type: String,
    pub period_start: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub status: InvoiceStatus,
    #[serde(default = "default_months_covered")]
    pub months_covered: i32,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn is_rent(&self) -> bool {
        self.invoice_type == RENT_INVOICE_TYPE
    }
}

fn default_months_covered() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    pub invoice_id: Option<String>,
    pub tenant_id: String,
    pub amount_paid: Decimal,
    pub payment_date: DateTime<Utc>,
    #[serde(default)]
    pub months_paid: Option<i32>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub applied_to_prepayment: bool,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub receipt_reference: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

/// Keyset position for paging through active leases by `(start_date, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseCursor {
    pub start_date: NaiveDate,
    pub lease_id: String,
}

impl LeaseCursor {
    pub fn after(lease: &Lease) -> Self {
        Self {
            start_date: lease.start_date,
            lease_id: lease.id.clone(),
        }
    }
}

/// One month of a coverage window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoveragePeriod {
    pub period_start: NaiveDate,
    pub due_date: NaiveDate,
}

/// Everything the atomic prepayment transaction needs, computed up front.
///
/// `periods` was scheduled from a lease whose `rent_paid_until` was
/// `expected_rent_paid_until`. The store refuses the window when the locked
/// lease row says otherwise.
#[derive(Debug, Clone)]
pub struct ApplyPrepaymentCommand {
    pub payment_id: String,
    pub lease_id: String,
    pub expected_rent_paid_until: Option<NaiveDate>,
    pub periods: Vec<CoveragePeriod>,
    pub monthly_rent: Decimal,
    pub payment_date: DateTime<Utc>,
    pub batch_id: String,
    pub sentinel: String,
}

impl ApplyPrepaymentCommand {
    pub fn months(&self) -> i32 {
        self.periods.len() as i32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPrepayment {
    /// Every invoice in the window, in period order.
    pub covered_invoice_ids: Vec<String>,
    /// Invoices this transaction moved to `paid`.
    pub touched_invoice_ids: Vec<String>,
    /// Invoices this transaction inserted.
    pub created_invoice_ids: Vec<String>,
    pub batch_id: String,
    pub rent_paid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyPrepaymentOutcome {
    Applied(AppliedPrepayment),
    /// The payment row was already flagged when locked; nothing was written.
    AlreadyApplied(Payment),
    /// Another allocation moved the lease after the window was scheduled, or
    /// every invoice in the window was already paid. Nothing was written.
    LeaseMoved { rent_paid_until: Option<NaiveDate> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleSettlement {
    pub already_paid: bool,
    pub rent_paid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRentInvoice {
    pub lease_id: String,
    pub period_start: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: Decimal,
}

impl NewRentInvoice {
    pub fn id(&self) -> String {
        rent_invoice_id(&self.lease_id, self.period_start)
    }
}

/// Outbox row for the "payment settled" notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementNotice {
    pub tenant_id: String,
    pub payment_id: String,
    pub invoice_id: Option<String>,
    pub amount: Decimal,
    pub receipt_reference: Option<String>,
    pub batch_id: Option<String>,
}
