use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AllocationPolicy;
use crate::periods::{due_date_for, month_start, next_month};
use crate::repository::models::{Invoice, Lease, LeaseCursor, NewRentInvoice};
use crate::repository::{LedgerStore, StoreResult};
use crate::schemas::AutoCreateInvoicesInput;
use crate::services::rent_coverage::coverage_start;

const LEASE_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaseFailure {
    pub lease_id: String,
    pub error: String,
}

/// Result of one invoice lifecycle run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoCreateResult {
    pub processed_leases: u32,
    pub invoices_created: u32,
    pub invoices_skipped: u32,
    pub created_invoice_ids: Vec<String>,
    pub errors: Vec<LeaseFailure>,
}

enum LeaseOutcome {
    Created(Invoice),
    Skipped(&'static str),
}

/// Create the next unpaid rent invoice for each active lease that owes one.
///
/// Active leases are read in pages ordered by `(start_date, id)`, so the
/// portfolio size is unbounded. At most one invoice per lease per run. The
/// (lease, type, period) unique key makes overlapping runs harmless. A lease
/// that fails is reported in `errors` and the run continues with the next one.
///
/// `force_recreate` ignores `next_rent_due_date` and restarts from the month
/// after `rent_paid_until`, recreating an invoice that went missing.
pub async fn auto_create_missing_invoices(
    store: &dyn LedgerStore,
    policy: &AllocationPolicy,
    options: &AutoCreateInvoicesInput,
    today: NaiveDate,
) -> StoreResult<AutoCreateResult> {
    let current_month = month_start(today);
    let mut result = AutoCreateResult::default();
    let mut cursor: Option<LeaseCursor> = None;

    loop {
        let page = store
            .list_active_leases(options.lease_ids.as_deref(), cursor.as_ref(), LEASE_PAGE_SIZE)
            .await?;

        for lease in &page {
            result.processed_leases += 1;
            match create_for_lease(store, policy, lease, options.force_recreate, current_month)
                .await
            {
                Ok(LeaseOutcome::Created(invoice)) => {
                    result.invoices_created += 1;
                    result.created_invoice_ids.push(invoice.id);
                }
                Ok(LeaseOutcome::Skipped(reason)) => {
                    debug!(lease_id = %lease.id, reason, "Invoice lifecycle: lease skipped");
                    result.invoices_skipped += 1;
                }
                Err(error) => {
                    warn!(lease_id = %lease.id, error = %error, "Invoice lifecycle: lease failed");
                    result.errors.push(LeaseFailure {
                        lease_id: lease.id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        match page.last() {
            Some(last) if page.len() == LEASE_PAGE_SIZE => cursor = Some(LeaseCursor::after(last)),
            _ => break,
        }
    }

    info!(
        processed = result.processed_leases,
        created = result.invoices_created,
        skipped = result.invoices_skipped,
        errors = result.errors.len(),
        "Invoice lifecycle run completed"
    );
    Ok(result)
}

async fn create_for_lease(
    store: &dyn LedgerStore,
    policy: &AllocationPolicy,
    lease: &Lease,
    force_recreate: bool,
    current_month: NaiveDate,
) -> StoreResult<LeaseOutcome> {
    let period = coverage_start(lease, None, !force_recreate);
    if period > current_month {
        return Ok(LeaseOutcome::Skipped("not yet due"));
    }
    if lease
        .end_date
        .is_some_and(|end_date| period > month_start(end_date))
    {
        return Ok(LeaseOutcome::Skipped("lease ended"));
    }

    let created = store
        .upsert_rent_invoice(&NewRentInvoice {
            lease_id: lease.id.clone(),
            period_start: period,
            due_date: due_date_for(period, policy.rent_due_day),
            amount: lease.monthly_rent,
        })
        .await?;
    store
        .set_next_rent_due_date(&lease.id, next_month(period))
        .await?;

    Ok(match created {
        Some(invoice) => LeaseOutcome::Created(invoice),
        None => LeaseOutcome::Skipped("invoice exists"),
    })
}

/// Flip unpaid rent invoices past their due date to overdue.
pub async fn mark_overdue_invoices(store: &dyn LedgerStore, today: NaiveDate) -> StoreResult<u64> {
    let flipped = store.mark_overdue_invoices(today).await?;
    if flipped > 0 {
        info!(flipped, as_of = %today, "Rent invoices marked overdue");
    }
    Ok(flipped)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::repository::memory_ledger::MemoryLedgerStore;
    use crate::repository::models::{rent_invoice_id, InvoiceStatus, LeaseStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn lease(id: &str, start_date: NaiveDate) -> Lease {
        Lease {
            id: id.to_string(),
            tenant_id: format!("tenant-{id}"),
            monthly_rent: Decimal::from(10_000),
            status: LeaseStatus::Active,
            start_date,
            end_date: None,
            rent_paid_until: None,
            next_rent_due_date: None,
        }
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let store = MemoryLedgerStore::new();
        store.insert_lease(lease("lease-1", date(2026, 3, 1))).await;
        let policy = AllocationPolicy::default();
        let options = AutoCreateInvoicesInput::default();

        let first = auto_create_missing_invoices(&store, &policy, &options, date(2026, 3, 10))
            .await
            .expect("first run");
        let second = auto_create_missing_invoices(&store, &policy, &options, date(2026, 3, 10))
            .await
            .expect("second run");

        assert_eq!(first.invoices_created, 1);
        assert_eq!(
            first.created_invoice_ids,
            vec![rent_invoice_id("lease-1", date(2026, 3, 1))]
        );
        assert_eq!(second.invoices_created, 0);
        assert_eq!(second.invoices_skipped, 1);
        assert_eq!(store.invoices_for("lease-1").await.len(), 1);
        let lease = store.lease("lease-1").await.expect("lease");
        assert_eq!(lease.next_rent_due_date, Some(date(2026, 4, 1)));
        assert_eq!(lease.rent_paid_until, None);
    }

    #[tokio::test]
    async fn skips_leases_not_yet_due_or_ended() {
        let store = MemoryLedgerStore::new();
        store.insert_lease(lease("future", date(2026, 3, 15))).await;
        let mut ended = lease("ended", date(2025, 6, 1));
        ended.end_date = Some(date(2026, 1, 31));
        ended.rent_paid_until = Some(date(2026, 1, 1));
        store.insert_lease(ended).await;
        let mut inactive = lease("pending", date(2026, 1, 1));
        inactive.status = LeaseStatus::Pending;
        store.insert_lease(inactive).await;

        let result = auto_create_missing_invoices(
            &store,
            &AllocationPolicy::default(),
            &AutoCreateInvoicesInput::default(),
            date(2026, 3, 10),
        )
        .await
        .expect("run");

        assert_eq!(result.processed_leases, 2);
        assert_eq!(result.invoices_created, 0);
        assert_eq!(result.invoices_skipped, 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn force_recreate_restores_missing_invoice() {
        let store = MemoryLedgerStore::new();
        let mut drifted = lease("lease-1", date(2026, 1, 1));
        drifted.rent_paid_until = Some(date(2026, 2, 1));
        drifted.next_rent_due_date = Some(date(2026, 5, 1));
        store.insert_lease(drifted).await;
        let policy = AllocationPolicy::default();

        let normal = auto_create_missing_invoices(
            &store,
            &policy,
            &AutoCreateInvoicesInput::default(),
            date(2026, 3, 10),
        )
        .await
        .expect("normal run");
        assert_eq!(normal.invoices_created, 0);

        let forced = auto_create_missing_invoices(
            &store,
            &policy,
            &AutoCreateInvoicesInput {
                lease_ids: Some(vec!["lease-1".to_string()]),
                force_recreate: true,
            },
            date(2026, 3, 10),
        )
        .await
        .expect("forced run");
        assert_eq!(
            forced.created_invoice_ids,
            vec![rent_invoice_id("lease-1", date(2026, 3, 1))]
        );
        let lease = store.lease("lease-1").await.expect("lease");
        assert_eq!(lease.next_rent_due_date, Some(date(2026, 5, 1)));
    }

    #[tokio::test]
    async fn restricts_to_requested_leases() {
        let store = MemoryLedgerStore::new();
        store.insert_lease(lease("lease-1", date(2026, 3, 1))).await;
        store.insert_lease(lease("lease-2", date(2026, 3, 1))).await;

        let result = auto_create_missing_invoices(
            &store,
            &AllocationPolicy::default(),
            &AutoCreateInvoicesInput {
                lease_ids: Some(vec!["lease-2".to_string()]),
                force_recreate: false,
            },
            date(2026, 3, 10),
        )
        .await
        .expect("run");

        assert_eq!(result.processed_leases, 1);
        assert!(store.invoices_for("lease-1").await.is_empty());
        assert_eq!(store.invoices_for("lease-2").await.len(), 1);
    }

    #[tokio::test]
    async fn pages_through_every_active_lease() {
        let store = MemoryLedgerStore::new();
        let total = LEASE_PAGE_SIZE * 2 + 1;
        for index in 0..total {
            store
                .insert_lease(lease(&format!("lease-{index:04}"), date(2026, 3, 1)))
                .await;
        }

        let result = auto_create_missing_invoices(
            &store,
            &AllocationPolicy::default(),
            &AutoCreateInvoicesInput::default(),
            date(2026, 3, 10),
        )
        .await
        .expect("run");

        assert_eq!(result.processed_leases as usize, total);
        assert_eq!(result.invoices_created as usize, total);
        let last = format!("lease-{:04}", total - 1);
        assert_eq!(store.invoices_for(&last).await.len(), 1);
    }

    #[tokio::test]
    async fn marks_past_due_invoices_overdue() {
        let store = MemoryLedgerStore::new();
        store.insert_lease(lease("lease-1", date(2026, 1, 1))).await;
        auto_create_missing_invoices(
            &store,
            &AllocationPolicy::default(),
            &AutoCreateInvoicesInput::default(),
            date(2026, 1, 1),
        )
        .await
        .expect("run");

        assert_eq!(mark_overdue_invoices(&store, date(2026, 1, 1)).await.expect("sweep"), 0);
        assert_eq!(mark_overdue_invoices(&store, date(2026, 1, 2)).await.expect("sweep"), 1);
        assert_eq!(mark_overdue_invoices(&store, date(2026, 1, 3)).await.expect("sweep"), 0);
        let invoices = store.invoices_for("lease-1").await;
        assert_eq!(invoices[0].status, InvoiceStatus::Overdue);
    }
}
