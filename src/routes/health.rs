use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match &state.db_pool {
        // Bounded so the probe answers even when the first connection hangs.
        Some(pool) => match tokio::time::timeout(
            Duration::from_secs(3),
            sqlx::query("SELECT 1").fetch_one(pool),
        )
        .await
        {
            Ok(Ok(_)) => Some(true),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Health check DB query failed");
                Some(false)
            }
            Err(_) => {
                tracing::error!("Health check DB query timed out (3s)");
                Some(false)
            }
        },
        None => None,
    };

    let status = match db_ok {
        Some(true) => "ok",
        _ => "degraded",
    };
    Json(json!({
        "status": status,
        "app": state.config.app_name,
        "now": Utc::now().to_rfc3339(),
        "db": db_ok
    }))
}
