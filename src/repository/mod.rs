pub mod ledger_store;
#[cfg(test)]
pub mod memory_ledger;
pub mod models;
pub mod pg_ledger;

pub use ledger_store::{LedgerStore, StoreError, StoreResult};
pub use pg_ledger::PgLedgerStore;
