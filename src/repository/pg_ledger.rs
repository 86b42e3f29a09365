use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use super::ledger_store::{LedgerStore, StoreError, StoreResult};
use super::models::{
    rent_invoice_id, AppliedPrepayment, ApplyPrepaymentCommand, ApplyPrepaymentOutcome, Invoice,
    Lease, LeaseCursor, NewRentInvoice, Payment, SettlementNotice, SingleSettlement,
    RENT_INVOICE_TYPE,
};
use crate::periods::next_month;

const TENANT_PAYMENT_SCAN_LIMIT: i64 = 500;

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_lease(&self, lease_id: &str) -> StoreResult<Option<Lease>> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row FROM leases t WHERE t.id::text = $1 LIMIT 1",
        )
        .bind(lease_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_optional(row)
    }

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row FROM invoices t WHERE t.id::text = $1 LIMIT 1",
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_optional(row)
    }

    async fn get_payment(&self, payment_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row FROM payments t WHERE t.id::text = $1 LIMIT 1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_optional(row)
    }

    async fn list_open_rent_invoices(&self, lease_id: &str) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row
             FROM invoices t
             WHERE t.lease_id::text = $1
               AND t.invoice_type = $2
               AND t.status IN ('unpaid', 'overdue', 'partially_paid')
             ORDER BY t.due_date ASC, t.period_start ASC",
        )
        .bind(lease_id)
        .bind(RENT_INVOICE_TYPE)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_rows(rows)
    }

    async fn list_rent_invoices_in_range(
        &self,
        lease_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row
             FROM invoices t
             WHERE t.lease_id::text = $1
               AND t.invoice_type = $2
               AND t.period_start BETWEEN $3 AND $4
             ORDER BY t.period_start ASC",
        )
        .bind(lease_id)
        .bind(RENT_INVOICE_TYPE)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_rows(rows)
    }

    async fn latest_paid_rent_invoice(
        &self,
        lease_id: &str,
        not_before: NaiveDate,
    ) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row
             FROM invoices t
             WHERE t.lease_id::text = $1
               AND t.invoice_type = $2
               AND t.status = 'paid'
               AND t.period_start >= $3
             ORDER BY t.period_start DESC
             LIMIT 1",
        )
        .bind(lease_id)
        .bind(RENT_INVOICE_TYPE)
        .bind(not_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_optional(row)
    }

    async fn count_paid_rent_invoices(&self, lease_id: &str) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::bigint
             FROM invoices t
             WHERE t.lease_id::text = $1 AND t.invoice_type = $2 AND t.status = 'paid'",
        )
        .bind(lease_id)
        .bind(RENT_INVOICE_TYPE)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn list_tenant_payments_between(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row
             FROM payments t
             WHERE t.tenant_id::text = $1
               AND t.payment_date BETWEEN $2 AND $3
             ORDER BY t.payment_date ASC
             LIMIT $4",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .bind(TENANT_PAYMENT_SCAN_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_rows(rows)
    }

    async fn list_active_leases(
        &self,
        lease_ids: Option<&[String]>,
        after: Option<&LeaseCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Lease>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row
             FROM leases t
             WHERE t.status = 'active'
               AND ($1::text[] IS NULL OR t.id::text = ANY($1))
               AND ($2::date IS NULL OR (t.start_date, t.id::text) > ($2::date, $3::text))
             ORDER BY t.start_date ASC, t.id::text ASC
             LIMIT $4",
        )
        .bind(lease_ids.map(<[String]>::to_vec))
        .bind(after.map(|cursor| cursor.start_date))
        .bind(after.map(|cursor| cursor.lease_id.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        read_rows(rows)
    }

    async fn apply_rent_prepayment(
        &self,
        command: &ApplyPrepaymentCommand,
    ) -> StoreResult<ApplyPrepaymentOutcome> {
        let (Some(first), Some(last)) = (command.periods.first(), command.periods.last()) else {
            return Err(StoreError::Conflict(
                "Prepayment window is empty.".to_string(),
            ));
        };
        let (first_period, last_period) = (first.period_start, last.period_start);

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // The payment row lock serializes concurrent applications of the same payment.
        let payment_row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row FROM payments t WHERE t.id::text = $1 FOR UPDATE",
        )
        .bind(&command.payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let payment: Payment = read_optional(payment_row)?
            .ok_or_else(|| StoreError::NotFound("payments record".to_string()))?;
        if payment.applied_to_prepayment {
            tx.rollback().await.map_err(map_db_error)?;
            return Ok(ApplyPrepaymentOutcome::AlreadyApplied(payment));
        }

        // Allocations of different payments on one lease queue behind this lock.
        let lease_row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row FROM leases t WHERE t.id::text = $1 FOR UPDATE",
        )
        .bind(&command.lease_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let lease: Lease = read_optional(lease_row)?
            .ok_or_else(|| StoreError::NotFound("leases record".to_string()))?;
        if lease.rent_paid_until != command.expected_rent_paid_until {
            tx.rollback().await.map_err(map_db_error)?;
            return Ok(ApplyPrepaymentOutcome::LeaseMoved {
                rent_paid_until: lease.rent_paid_until,
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
            if let Some(created) = insert_invoice(&mut *tx, &new_invoice).await? {
                created_invoice_ids.push(created.id);
            }

            let touched = sqlx::query_scalar::<_, String>(
                "UPDATE invoices
                 SET status = 'paid', payment_date = $3, months_covered = $4, updated_at = now()
                 WHERE lease_id::text = $1
                   AND invoice_type = 'rent'
                   AND period_start = $2
                   AND status <> 'paid'
                 RETURNING id::text",
            )
            .bind(&command.lease_id)
            .bind(period.period_start)
            .bind(command.payment_date)
            .bind(command.months())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;

            let invoice_id = match touched {
                Some(id) => {
                    touched_invoice_ids.push(id.clone());
                    id
                }
                None => sqlx::query_scalar::<_, String>(
                    "SELECT id::text FROM invoices
                     WHERE lease_id::text = $1 AND invoice_type = 'rent' AND period_start = $2",
                )
                .bind(&command.lease_id)
                .bind(period.period_start)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_error)?
                .unwrap_or_else(|| rent_invoice_id(&command.lease_id, period.period_start)),
            };
            covered_invoice_ids.push(invoice_id);
        }

        if touched_invoice_ids.is_empty() {
            tx.rollback().await.map_err(map_db_error)?;
            return Ok(ApplyPrepaymentOutcome::LeaseMoved {
                rent_paid_until: lease.rent_paid_until,
            });
        }

        let rent_paid_until =
            advance_pointers_in(&mut *tx, &command.lease_id, last_period, next_month(last_period))
                .await?;

        sqlx::query(
            "UPDATE payments
             SET applied_to_prepayment = true,
                 batch_id = $2::uuid,
                 months_paid = $3,
                 notes = CASE
                     WHEN notes IS NULL OR btrim(notes) = '' THEN $4
                     ELSE notes || E'\\n' || $4
                 END
             WHERE id::text = $1",
        )
        .bind(&command.payment_id)
        .bind(&command.batch_id)
        .bind(command.months())
        .bind(&command.sentinel)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;

        tracing::debug!(
            payment_id = %command.payment_id,
            first_period = %first_period,
            last_period = %last_period,
            "Prepayment transaction committed"
        );

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
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let row = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) AS row FROM invoices t WHERE t.id::text = $1 FOR UPDATE",
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let invoice: Invoice = read_optional(row)?
            .ok_or_else(|| StoreError::NotFound("invoices record".to_string()))?;

        if !invoice.status.is_open() {
            let rent_paid_until = sqlx::query_scalar::<_, Option<NaiveDate>>(
                "SELECT rent_paid_until FROM leases WHERE id::text = $1",
            )
            .bind(&invoice.lease_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
            .flatten();
            tx.rollback().await.map_err(map_db_error)?;
            return Ok(SingleSettlement {
                already_paid: true,
                rent_paid_until,
            });
        }

        let updated = sqlx::query_scalar::<_, Value>(
            "UPDATE invoices t
             SET status = 'paid', payment_date = $2, updated_at = now()
             WHERE t.id::text = $1
             RETURNING row_to_json(t) AS row",
        )
        .bind(invoice_id)
        .bind(payment_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let invoice: Invoice = serde_json::from_value(updated)?;

        let rent_paid_until = advance_pointers_in(
            &mut *tx,
            &invoice.lease_id,
            invoice.period_start,
            next_month(invoice.period_start),
        )
        .await?;

        tx.commit().await.map_err(map_db_error)?;

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
        let result = sqlx::query(
            "UPDATE leases
             SET rent_paid_until = GREATEST(rent_paid_until, $2),
                 next_rent_due_date = GREATEST(next_rent_due_date, $3),
                 updated_at = now()
             WHERE id::text = $1
               AND (rent_paid_until IS NULL OR rent_paid_until < $2
                    OR next_rent_due_date IS NULL OR next_rent_due_date < $3)",
        )
        .bind(lease_id)
        .bind(rent_paid_until)
        .bind(next_rent_due_date)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_rent_invoice(&self, invoice: &NewRentInvoice) -> StoreResult<Option<Invoice>> {
        let mut conn = self.pool.acquire().await.map_err(map_db_error)?;
        insert_invoice(&mut *conn, invoice).await
    }

    async fn set_next_rent_due_date(
        &self,
        lease_id: &str,
        next_due: NaiveDate,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE leases
             SET next_rent_due_date = $2, updated_at = now()
             WHERE id::text = $1
               AND (next_rent_due_date IS NULL OR next_rent_due_date < $2)",
        )
        .bind(lease_id)
        .bind(next_due)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_overdue_invoices(&self, today: NaiveDate) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE invoices
             SET status = 'overdue', updated_at = now()
             WHERE invoice_type = 'rent' AND status = 'unpaid' AND due_date < $1",
        )
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected())
    }

    async fn enqueue_settlement_notice(&self, notice: &SettlementNotice) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO settlement_notices (
               tenant_id, payment_id, invoice_id, amount, receipt_reference, batch_id, status
             ) VALUES ($1::uuid, $2::uuid, $3::uuid, $4, $5, $6::uuid, 'queued')",
        )
        .bind(&notice.tenant_id)
        .bind(&notice.payment_id)
        .bind(notice.invoice_id.as_deref())
        .bind(notice.amount)
        .bind(notice.receipt_reference.as_deref())
        .bind(notice.batch_id.as_deref())
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }
}

async fn insert_invoice(
    conn: &mut PgConnection,
    invoice: &NewRentInvoice,
) -> StoreResult<Option<Invoice>> {
    let row = sqlx::query_scalar::<_, Value>(
        "INSERT INTO invoices AS t (
           id, lease_id, invoice_type, period_start, due_date, amount, status, months_covered
         ) VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, 'unpaid', 1)
         ON CONFLICT (lease_id, invoice_type, period_start) DO NOTHING
         RETURNING row_to_json(t) AS row",
    )
    .bind(invoice.id())
    .bind(&invoice.lease_id)
    .bind(RENT_INVOICE_TYPE)
    .bind(invoice.period_start)
    .bind(invoice.due_date)
    .bind(invoice.amount)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)?;
    read_optional(row)
}

async fn advance_pointers_in(
    conn: &mut PgConnection,
    lease_id: &str,
    rent_paid_until: NaiveDate,
    next_rent_due_date: NaiveDate,
) -> StoreResult<Option<NaiveDate>> {
    sqlx::query_scalar::<_, Option<NaiveDate>>(
        "UPDATE leases
         SET rent_paid_until = GREATEST(rent_paid_until, $2),
             next_rent_due_date = GREATEST(next_rent_due_date, $3),
             updated_at = now()
         WHERE id::text = $1
         RETURNING rent_paid_until",
    )
    .bind(lease_id)
    .bind(rent_paid_until)
    .bind(next_rent_due_date)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| StoreError::NotFound("leases record".to_string()))
}

fn read_optional<T: DeserializeOwned>(row: Option<Value>) -> StoreResult<Option<T>> {
    row.map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}

fn read_rows<T: DeserializeOwned>(rows: Vec<Value>) -> StoreResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

fn map_db_error(error: sqlx::Error) -> StoreError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return StoreError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    StoreError::Database(error)
}
