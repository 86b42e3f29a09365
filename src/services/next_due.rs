use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::periods::{month_start, period_label};
use crate::repository::{LedgerStore, StoreError, StoreResult};

/// Read-only projection of what a lease owes next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextDueSummary {
    pub lease_id: String,
    pub next_due_date: Option<NaiveDate>,
    pub next_amount: Option<Decimal>,
    pub unpaid_count: usize,
    pub total_owed: Decimal,
    pub paid_count: i64,
    pub last_paid_period: Option<String>,
    pub rent_paid_until: Option<NaiveDate>,
}

pub async fn get_next_due_date(
    store: &dyn LedgerStore,
    lease_id: &str,
) -> StoreResult<NextDueSummary> {
    let lease = store
        .get_lease(lease_id)
        .await?
        .ok_or_else(|| StoreError::NotFound("leases record".to_string()))?;

    let open = store.list_open_rent_invoices(&lease.id).await?;
    let paid_count = store.count_paid_rent_invoices(&lease.id).await?;
    let latest_paid = store
        .latest_paid_rent_invoice(&lease.id, month_start(lease.start_date))
        .await?;

    let (next_due_date, next_amount) = match open.first() {
        Some(invoice) => (Some(invoice.due_date), Some(invoice.amount)),
        None => (
            lease.next_rent_due_date,
            lease.next_rent_due_date.map(|_| lease.monthly_rent),
        ),
    };
    let total_owed = open
        .iter()
        .fold(Decimal::ZERO, |total, invoice| total + invoice.amount);

    let last_paid_period = latest_paid
        .map(|invoice| invoice.period_start)
        .or(lease.rent_paid_until)
        .map(period_label);

    Ok(NextDueSummary {
        lease_id: lease.id,
        next_due_date,
        next_amount,
        unpaid_count: open.len(),
        total_owed,
        paid_count,
        last_paid_period,
        rent_paid_until: lease.rent_paid_until,
    })
}
