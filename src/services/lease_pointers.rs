use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::periods::{month_start, next_month};
use crate::repository::{LedgerStore, StoreError, StoreResult};
use crate::services::rent_coverage::eligible_start_month;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointerSync {
    pub lease_id: String,
    pub advanced: bool,
    pub rent_paid_until: Option<NaiveDate>,
    pub next_rent_due_date: Option<NaiveDate>,
}

/// Re-derive a lease's pointers from its paid rent invoices.
///
/// Moves `rent_paid_until` to the latest paid period (and
/// `next_rent_due_date` to the month after) only when that period is later
/// than what the lease stores. Repeated or concurrent calls converge on the
/// same state.
pub async fn sync_lease_pointers(
    store: &dyn LedgerStore,
    lease_id: &str,
) -> StoreResult<PointerSync> {
    let lease = store
        .get_lease(lease_id)
        .await?
        .ok_or_else(|| StoreError::NotFound("leases record".to_string()))?;

    let eligible = eligible_start_month(lease.start_date);
    let latest_paid = store.latest_paid_rent_invoice(&lease.id, eligible).await?;

    let unchanged = PointerSync {
        lease_id: lease.id.clone(),
        advanced: false,
        rent_paid_until: lease.rent_paid_until,
        next_rent_due_date: lease.next_rent_due_date,
    };
    let Some(invoice) = latest_paid else {
        return Ok(unchanged);
    };

    let period = month_start(invoice.period_start);
    let behind = lease
        .rent_paid_until
        .map_or(true, |paid_until| period > month_start(paid_until));
    if !behind {
        return Ok(unchanged);
    }

    let next_due = next_month(period);
    let advanced = store
        .advance_lease_pointers(&lease.id, period, next_due)
        .await?;
    if advanced {
        info!(
            lease_id = %lease.id,
            rent_paid_until = %period,
            next_rent_due_date = %next_due,
            "Lease pointers repaired from invoice state"
        );
    }

    Ok(PointerSync {
        lease_id: lease.id,
        advanced,
        rent_paid_until: Some(period),
        next_rent_due_date: Some(
            lease
                .next_rent_due_date
                .map_or(next_due, |current| current.max(next_due)),
        ),
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::repository::memory_ledger::MemoryLedgerStore;
    use crate::repository::models::{rent_invoice_id, Invoice, InvoiceStatus, Lease, LeaseStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn paid_invoice(lease_id: &str, period: NaiveDate) -> Invoice {
        Invoice {
            id: rent_invoice_id(lease_id, period),
            lease_id: lease_id.to_string(),
            invoice_type: "rent".to_string(),
            period_start: period,
            due_date: period,
            amount: Decimal::from(10_000),
            status: InvoiceStatus::Paid,
            months_covered: 1,
            payment_date: None,
        }
    }

    async fn seeded_store(rent_paid_until: Option<NaiveDate>) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        store
            .insert_lease(Lease {
                id: "lease-1".to_string(),
                tenant_id: "tenant-1".to_string(),
                monthly_rent: Decimal::from(10_000),
                status: LeaseStatus::Active,
                start_date: date(2026, 1, 10),
                end_date: None,
                rent_paid_until,
                next_rent_due_date: rent_paid_until.map(next_month),
            })
            .await;
        store
    }

    #[tokio::test]
    async fn advances_drifted_pointers() {
        let store = seeded_store(Some(date(2026, 2, 1))).await;
        store.insert_invoice(paid_invoice("lease-1", date(2026, 2, 1))).await;
        store.insert_invoice(paid_invoice("lease-1", date(2026, 3, 1))).await;
        store.insert_invoice(paid_invoice("lease-1", date(2026, 4, 1))).await;

        let sync = sync_lease_pointers(&store, "lease-1").await.expect("sync");
        assert!(sync.advanced);
        assert_eq!(sync.rent_paid_until, Some(date(2026, 4, 1)));
        assert_eq!(sync.next_rent_due_date, Some(date(2026, 5, 1)));

        let again = sync_lease_pointers(&store, "lease-1").await.expect("sync");
        assert!(!again.advanced);
        let lease = store.lease("lease-1").await.expect("lease");
        assert_eq!(lease.rent_paid_until, Some(date(2026, 4, 1)));
    }

    #[tokio::test]
    async fn never_regresses_pointers() {
        let store = seeded_store(Some(date(2026, 6, 1))).await;
        store.insert_invoice(paid_invoice("lease-1", date(2026, 3, 1))).await;

        let sync = sync_lease_pointers(&store, "lease-1").await.expect("sync");
        assert!(!sync.advanced);
        let lease = store.lease("lease-1").await.expect("lease");
        assert_eq!(lease.rent_paid_until, Some(date(2026, 6, 1)));
        assert_eq!(lease.next_rent_due_date, Some(date(2026, 7, 1)));
    }

    #[tokio::test]
    async fn ignores_invoices_before_eligible_start() {
        let store = seeded_store(None).await;
        store.insert_invoice(paid_invoice("lease-1", date(2026, 1, 1))).await;

        let sync = sync_lease_pointers(&store, "lease-1").await.expect("sync");
        assert!(!sync.advanced);
        assert_eq!(sync.rent_paid_until, None);
    }

    #[tokio::test]
    async fn missing_lease_is_not_found() {
        let store = MemoryLedgerStore::new();
        let error = sync_lease_pointers(&store, "nope").await.expect_err("missing");
        assert!(matches!(error, StoreError::NotFound(_)));
    }
}
