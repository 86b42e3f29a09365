use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::build_pool;
use crate::error::{AppError, AppResult};
use crate::repository::PgLedgerStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, sqlx::Error> {
        let db_pool = build_pool(&config)?;
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set; rent endpoints will return 503");
        }
        Ok(Self {
            config: Arc::new(config),
            db_pool,
        })
    }

    /// Ledger store over the shared pool.
    pub fn ledger(&self) -> AppResult<PgLedgerStore> {
        self.db_pool
            .as_ref()
            .map(|pool| PgLedgerStore::new(pool.clone()))
            .ok_or_else(|| {
                AppError::Dependency(
                    "Database is not configured. Set DATABASE_URL.".to_string(),
                )
            })
    }
}
