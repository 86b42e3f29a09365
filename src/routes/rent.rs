use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    auth::require_internal_key,
    error::{AppError, AppResult},
    schemas::{
        validate_input, AutoCreateInvoicesInput, LeasePath, MarkOverdueInput, RentPrepaymentInput,
    },
    services::{
        invoice_lifecycle::{auto_create_missing_invoices, mark_overdue_invoices},
        lease_pointers::sync_lease_pointers,
        next_due::get_next_due_date,
        rent_allocation::{process_rent_prepayment, validate_prepayment_data, AllocationError},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/rent/prepayments",
            axum::routing::post(process_prepayment),
        )
        .route(
            "/rent/prepayments/validate",
            axum::routing::post(validate_prepayment),
        )
        .route(
            "/rent/invoices/auto-create",
            axum::routing::post(auto_create_invoices),
        )
        .route(
            "/rent/invoices/mark-overdue",
            axum::routing::post(mark_overdue),
        )
        .route(
            "/leases/{lease_id}/next-due",
            axum::routing::get(next_due),
        )
        .route(
            "/leases/{lease_id}/sync-pointers",
            axum::routing::post(sync_pointers),
        )
}

async fn process_prepayment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RentPrepaymentInput>,
) -> AppResult<Response> {
    require_internal_key(&state, &headers)?;
    validate_input(&payload)?;
    let store = state.ledger()?;

    match process_rent_prepayment(&store, &state.config.allocation, &payload, Utc::now()).await {
        Ok(receipt) => Ok(Json(receipt).into_response()),
        Err(error) => Ok(allocation_failure(error)),
    }
}

async fn validate_prepayment(
    State(state): State<AppState>,
    Json(payload): Json<RentPrepaymentInput>,
) -> AppResult<Response> {
    validate_input(&payload)?;
    let store = state.ledger()?;

    match validate_prepayment_data(&store, &state.config.allocation, &payload, Utc::now()).await {
        Ok(report) => Ok(Json(report).into_response()),
        Err(error) => Ok(allocation_failure(error)),
    }
}

async fn auto_create_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AutoCreateInvoicesInput>,
) -> AppResult<impl IntoResponse> {
    require_internal_key(&state, &headers)?;
    validate_input(&payload)?;
    let store = state.ledger()?;

    let result = auto_create_missing_invoices(
        &store,
        &state.config.allocation,
        &payload,
        Utc::now().date_naive(),
    )
    .await?;
    Ok(Json(result))
}

async fn mark_overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MarkOverdueInput>,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let store = state.ledger()?;

    let as_of = payload.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let flipped = mark_overdue_invoices(&store, as_of).await?;
    Ok(Json(json!({ "as_of": as_of, "marked_overdue": flipped })))
}

async fn next_due(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
) -> AppResult<impl IntoResponse> {
    let store = state.ledger()?;
    let summary = get_next_due_date(&store, path.lease_id.trim()).await?;
    Ok(Json(summary))
}

async fn sync_pointers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<LeasePath>,
) -> AppResult<impl IntoResponse> {
    require_internal_key(&state, &headers)?;
    let store = state.ledger()?;
    let sync = sync_lease_pointers(&store, path.lease_id.trim()).await?;
    Ok(Json(sync))
}

/// Engine failures carry the individual check messages alongside `detail`.
fn allocation_failure(error: AllocationError) -> Response {
    let validation_errors = error.messages();
    let app_error = AppError::from(error);
    let status = app_error.status_code();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %app_error, "Rent allocation failed");
    }
    (
        status,
        Json(json!({
            "success": false,
            "validation_errors": validation_errors,
            "detail": app_error.to_string(),
        })),
    )
        .into_response()
}
