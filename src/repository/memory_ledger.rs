//! In-memory `LedgerStore` for tests.
//!
//! All state sits behind one mutex, so every trait method is atomic the same
//! way a database transaction would be.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::ledger_store::{LedgerStore, StoreError, StoreResult};
use super::models::{
    AppliedPrepayment, ApplyPrepaymentCommand, ApplyPrepaymentOutcome, Invoice, InvoiceStatus,
    Lease, LeaseCursor, LeaseStatus, NewRentInvoice, Payment, SettlementNotice, SingleSettlement,
    RENT_INVOICE_TYPE,
};
use crate::periods::next_month;

#[derive(Default)]
struct MemoryState {
    leases: HashMap<String, Lease>,
    invoices: HashMap<String, Invoice>,
    payments: HashMap<String, Payment>,
    notices: Vec<SettlementNotice>,
    fail_on_apply: bool,
    fail_on_notice: bool,
}

impl MemoryState {
    fn rent_invoice_for_period(&self, lease_id: &str, period_start: NaiveDate) -> Option<&Invoice> {
        self.invoices.values().find(|invoice| {
            invoice.lease_id == lease_id
                && invoice.invoice_type == RENT_INVOICE_TYPE
                && invoice.period_start == period_start
        })
    }

    fn insert_rent_invoice(&mut self, new_invoice: &NewRentInvoice) -> Option<Invoice> {
        if self
            .rent_invoice_for_period(&new_invoice.lease_id, new_invoice.period_start)
            .is_some()
        {
            return None;
        }
        let invoice = Invoice {
            id: new_invoice.id(),
            lease_id: new_invoice.lease_id.clone(),
            invoice_type: RENT_INVOICE_TYPE.to_string(),
            period_start: new_invoice.period_start,
            due_date: new_invoice.due_date,
            amount: new_invoice.amount,
            status: InvoiceStatus::Unpaid,
            months_covered: 1,
            payment_date: None,
        };
        self.invoices.insert(invoice.id.clone(), invoice.clone());
        Some(invoice)
    }

    fn advance_pointers(
        &mut self,
        lease_id: &str,
        rent_paid_until: NaiveDate,
        next_rent_due_date: NaiveDate,
    ) -> StoreResult<(bool, Option<NaiveDate>, Option<NaiveDate>)> {
        let lease = self
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| StoreError::NotFound("leases record".to_string()))?;
        let before = (lease.rent_paid_until, lease.next_rent_due_date);
        lease.rent_paid_until = Some(
            lease
                .rent_paid_until
                .map_or(rent_paid_until, |current| current.max(rent_paid_until)),
        );
        lease.next_rent_due_date = Some(
            lease
                .next_rent_due_date
                .map_or(next_rent_due_date, |current| current.max(next_rent_due_date)),
        );
        let after = (lease.rent_paid_until, lease.next_rent_due_date);
        Ok((before != after, after.0, after.1))
    }
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_lease(&self, lease: Lease) {
        self.state.lock().await.leases.insert(lease.id.clone(), lease);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.state
            .lock()
            .await
            .invoices
            .insert(invoice.id.clone(), invoice);
    }

    pub async fn insert_payment(&self, payment: Payment) {
        self.state
            .lock()
            .await
            .payments
            .insert(payment.id.clone(), payment);
    }

    pub async fn set_lease_status(&self, lease_id: &str, status: LeaseStatus) {
        if let Some(lease) = self.state.lock().await.leases.get_mut(lease_id) {
            lease.status = status;
        }
    }

    pub async fn set_fail_on_apply(&self, fail: bool) {
        self.state.lock().await.fail_on_apply = fail;
    }

    pub async fn set_fail_on_notice(&self, fail: bool) {
        self.state.lock().await.fail_on_notice = fail;
    }

    pub async fn lease(&self, lease_id: &str) -> Option<Lease> {
        self.state.lock().await.leases.get(lease_id).cloned()
    }

    pub async fn payment(&self, payment_id: &str) -> Option<Payment> {
        self.state.lock().await.payments.get(payment_id).cloned()
    }

    /// Rent invoices for `lease_id`, ordered by period.
    pub async fn invoices_for(&self, lease_id: &str) -> Vec<Invoice> {
        let state = self.state.lock().await;
        let mut invoices = state
            .invoices
            .values()
            .filter(|invoice| invoice.lease_id == lease_id)
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by_key(|invoice| invoice.period_start);
        invoices
    }

    pub async fn notices(&self) -> Vec<SettlementNotice> {
        self.state.lock().await.notices.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_lease(&self, lease_id: &str) -> StoreResult<Option<Lease>> {
        Ok(self.state.lock().await.leases.get(lease_id).cloned())
    }

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(invoice_id).cloned())
    }

    async fn get_payment(&self, payment_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(payment_id).cloned())
    }

    async fn list_open_rent_invoices(&self, lease_id: &str) -> StoreResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices = state
            .invoices
            .values()
            .filter(|invoice| {
                invoice.lease_id == lease_id && invoice.is_rent() && invoice.status.is_open()
            })
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by_key(|invoice| (invoice.due_date, invoice.period_start));
        Ok(invoices)
    }

    async fn list_rent_invoices_in_range(
        &self,
        lease_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices = state
            .invoices
            .values()
            .filter(|invoice| {
                invoice.lease_id == lease_id
                    && invoice.is_rent()
                    && invoice.period_start >= from
                    && invoice.period_start <= to
            })
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by_key(|invoice| invoice.period_start);
        Ok(invoices)
    }

    async fn latest_paid_rent_invoice(
        &self,
        lease_id: &str,
        not_before: NaiveDate,
    ) -> StoreResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .filter(|invoice| {
                invoice.lease_id == lease_id
                    && invoice.is_rent()
                    && invoice.status == InvoiceStatus::Paid
                    && invoice.period_start >= not_before
            })
            .max_by_key(|invoice| invoice.period_start)
            .cloned())
    }

    async fn count_paid_rent_invoices(&self, lease_id: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .filter(|invoice| {
                invoice.lease_id == lease_id
                    && invoice.is_rent()
                    && invoice.status == InvoiceStatus::Paid
            })
            .count() as i64)
    }

    async fn list_tenant_payments_between(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments = state
            .payments
            .values()
            .filter(|payment| {
                payment.tenant_id == tenant_id
                    && payment.payment_date >= from
                    && payment.payment_date <= to
            })
            .cloned()
            .collect::<Vec<_>>();
        payments.sort_by_key(|payment| payment.payment_date);
        Ok(payments)
    }

    async fn list_active_leases(
        &self,
        lease_ids: Option<&[String]>,
        after: Option<&LeaseCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Lease>> {
        let state = self.state.lock().await;
        let mut leases = state
            .leases
            .values()
            .filter(|lease| lease.status == LeaseStatus::Active)
            .filter(|lease| lease_ids.map_or(true, |ids| ids.contains(&lease.id)))
            .filter(|lease| {
                after.map_or(true, |cursor| {
                    (lease.start_date, lease.id.as_str())
                        > (cursor.start_date, cursor.lease_id.as_str())
                })
            })
            .cloned()
            .collect::<Vec<_>>();
        leases.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        leases.truncate(limit);
        Ok(leases)
    }

    async fn apply_rent_prepayment(
        &self,
        command: &ApplyPrepaymentCommand,
    ) -> StoreResult<ApplyPrepaymentOutcome> {
        let mut state = self.state.lock().await;
        if state.fail_on_apply {
            return Err(StoreError::Unavailable(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }
        let Some(last) = command.periods.last() else {
            return Err(StoreError::Conflict(
                "Prepayment window is empty.".to_string(),
            ));
        };

        let payment = state
            .payments
            .get(&command.payment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("payments record".to_string()))?;
        if payment.applied_to_prepayment {
            return Ok(ApplyPrepaymentOutcome::AlreadyApplied(payment));
        }
        let locked_paid_until = state
            .leases
            .get(&command.lease_id)
            .ok_or_else(|| StoreError::NotFound("leases record".to_string()))?
            .rent_paid_until;
        let any_open = command.periods.iter().any(|period| {
            state
                .rent_invoice_for_period(&command.lease_id, period.period_start)
                .map_or(true, |invoice| invoice.status != InvoiceStatus::Paid)
        });
        if locked_paid_until != command.expected_rent_paid_until || !any_open {
            return Ok(ApplyPrepaymentOutcome::LeaseMoved {
                rent_paid_until: locked_paid_until,
            });
        }

        let mut covered_invoice_ids = Vec::with_capacity(command.periods.len());
        let mut touched_invoice_ids = Vec::new();
        let mut created_invoice_ids = Vec::new();

        for period in &command.periods {
            let new_invoice = NewRentInvoice {
                lease_id: command.lease_id.clone(),
                period_start: period.period_start,
                due_date: period.due_date,
                amount: command.monthly_rent,
            };
            if let Some(created) = state.insert_rent_invoice(&new_invoice) {
                created_invoice_ids.push(created.id);
            }
            let invoice_id = state
                .rent_invoice_for_period(&command.lease_id, period.period_start)
                .map(|invoice| invoice.id.clone())
                .unwrap_or_else(|| new_invoice.id());
            if let Some(invoice) = state.invoices.get_mut(&invoice_id) {
                if invoice.status != InvoiceStatus::Paid {
                    invoice.status = InvoiceStatus::Paid;
                    invoice.payment_date = Some(command.payment_date);
                    invoice.months_covered = command.months();
                    touched_invoice_ids.push(invoice_id.clone());
                }
            }
            covered_invoice_ids.push(invoice_id);
        }

        let (_, rent_paid_until, _) = state.advance_pointers(
            &command.lease_id,
            last.period_start,
            next_month(last.period_start),
        )?;

        if let Some(payment) = state.payments.get_mut(&command.payment_id) {
            payment.applied_to_prepayment = true;
            payment.batch_id = Some(command.batch_id.clone());
            payment.months_paid = Some(command.months());
            payment.notes = Some(match payment.notes.as_deref().map(str::trim) {
                Some(existing) if !existing.is_empty() => {
                    format!("{existing}\n{}", command.sentinel)
                }
                _ => command.sentinel.clone(),
            });
        }

        Ok(ApplyPrepaymentOutcome::Applied(AppliedPrepayment {
            covered_invoice_ids,
            touched_invoice_ids,
            created_invoice_ids,
            batch_id: command.batch_id.clone(),
            rent_paid_until,
        }))
    }

    async fn settle_single_invoice(
        &self,
        invoice_id: &str,
        payment_date: DateTime<Utc>,
    ) -> StoreResult<SingleSettlement> {
        let mut state = self.state.lock().await;
        let invoice = state
            .invoices
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("invoices record".to_string()))?;

        if !invoice.status.is_open() {
            return Ok(SingleSettlement {
                already_paid: true,
                rent_paid_until: state
                    .leases
                    .get(&invoice.lease_id)
                    .and_then(|lease| lease.rent_paid_until),
            });
        }

        let (_, rent_paid_until, _) = state.advance_pointers(
            &invoice.lease_id,
            invoice.period_start,
            next_month(invoice.period_start),
        )?;
        let mut paid = invoice;
        paid.status = InvoiceStatus::Paid;
        paid.payment_date = Some(payment_date);
        state.invoices.insert(paid.id.clone(), paid);

        Ok(SingleSettlement {
            already_paid: false,
            rent_paid_until,
        })
    }

    async fn advance_lease_pointers(
        &self,
        lease_id: &str,
        rent_paid_until: NaiveDate,
        next_rent_due_date: NaiveDate,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let (moved, _, _) = state.advance_pointers(lease_id, rent_paid_until, next_rent_due_date)?;
        Ok(moved)
    }

    async fn upsert_rent_invoice(&self, invoice: &NewRentInvoice) -> StoreResult<Option<Invoice>> {
        Ok(self.state.lock().await.insert_rent_invoice(invoice))
    }

    async fn set_next_rent_due_date(
        &self,
        lease_id: &str,
        next_due: NaiveDate,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(lease) = state.leases.get_mut(lease_id) else {
            return Ok(false);
        };
        if lease.next_rent_due_date.is_some_and(|current| current >= next_due) {
            return Ok(false);
        }
        lease.next_rent_due_date = Some(next_due);
        Ok(true)
    }

    async fn mark_overdue_invoices(&self, today: NaiveDate) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut flipped = 0;
        for invoice in state.invoices.values_mut() {
            if invoice.is_rent()
                && invoice.status == InvoiceStatus::Unpaid
                && invoice.due_date < today
            {
                invoice.status = InvoiceStatus::Overdue;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn enqueue_settlement_notice(&self, notice: &SettlementNotice) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_on_notice {
            return Err(StoreError::Unavailable(
                "notification outbox unavailable".to_string(),
            ));
        }
        state.notices.push(notice.clone());
        Ok(())
    }
}
