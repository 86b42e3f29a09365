use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use tokio::time::sleep;

use crate::repository::{LedgerStore, PgLedgerStore};
use crate::schemas::AutoCreateInvoicesInput;
use crate::services::invoice_lifecycle::{auto_create_missing_invoices, mark_overdue_invoices};
use crate::state::AppState;

/// Spawn the background scheduler that runs the daily rent jobs.
///
/// The jobs run in their own `tokio::spawn`, so a failure never stops the
/// loop.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let pool = match state.db_pool.as_ref() {
        Some(p) => p.clone(),
        None => {
            tracing::warn!("Scheduler: no database pool configured, exiting");
            return;
        }
    };
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let run_hour = state.config.invoice_scheduler_hour_utc;

    let mut last_daily_run: Option<(i32, u32)> = None;

    loop {
        sleep(Duration::from_secs(60)).await;

        let now_utc = Utc::now();
        let today = now_utc.date_naive();
        let run_key = (today.year(), today.ordinal());
        if last_daily_run == Some(run_key) {
            continue;
        }
        if now_utc.hour() < run_hour {
            continue;
        }

        last_daily_run = Some(run_key);
        tracing::info!("Scheduler: running daily rent jobs for {today}");

        let store = store.clone();
        let policy = state.config.allocation.clone();
        tokio::spawn(async move {
            run_daily_rent_jobs(store.as_ref(), &policy, today).await;
        });
    }
}

/// Lifecycle first so invoices created today are swept on their due date.
async fn run_daily_rent_jobs(
    store: &dyn LedgerStore,
    policy: &crate::config::AllocationPolicy,
    today: NaiveDate,
) {
    match auto_create_missing_invoices(store, policy, &AutoCreateInvoicesInput::default(), today)
        .await
    {
        Ok(result) => tracing::info!(
            processed = result.processed_leases,
            created = result.invoices_created,
            failed = result.errors.len(),
            "Scheduler: invoice lifecycle completed"
        ),
        Err(error) => tracing::error!(error = %error, "Scheduler: invoice lifecycle failed"),
    }

    match mark_overdue_invoices(store, today).await {
        Ok(flipped) => tracing::info!(flipped, "Scheduler: overdue sweep completed"),
        Err(error) => tracing::error!(error = %error, "Scheduler: overdue sweep failed"),
    }
}
