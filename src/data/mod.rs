//! Persistence of raw sweeps and the summary log.

pub mod ledger;
pub mod storage;

pub use ledger::{Baseline, SummaryLedger, SummaryRecord};
pub use storage::CsvSweepStore;
