//! Reconciliation: rebuild ledger books from authoritative sale history

mod job;

pub use job::{ReconciliationJob, ReconciliationReport};
