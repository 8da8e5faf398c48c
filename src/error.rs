//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole acquisition
//! pipeline. Using the `thiserror` crate, it provides a centralized and consistent way
//! to handle the kinds of errors that can occur, from configuration issues at startup
//! to instrument and persistence failures while sweeps are being recorded.
//!
//! ## Error Hierarchy
//!
//! `DaqError` is an enum that consolidates the various error sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the layered configuration.
//! - **`Configuration`**: Semantic errors in the configuration, such as a zero poll
//!   interval. These are caught during the validation step.
//! - **`Io`**: Wraps standard `std::io::Error` (e.g. the output directory cannot be created).
//! - **`Instrument`**: Communication or protocol failure with the analyzer. The
//!   acquisition loop recovers from these by skipping the current poll.
//! - **`InvalidSweep`**: The analyzer answered, but the frequency and magnitude traces
//!   do not pair up. Handled exactly like `Instrument`.
//! - **`Persistence`**: A raw sweep record or a summary line could not be written.
//!   Logged by the recorder; the next sweep is still processed.
//! - **`WorkerFailed`**: A pipeline task ended on its own (a panic) before a stop
//!   was requested. Reported at shutdown, never retried.
//! - **`FeatureNotEnabled`**: Functionality that was not compiled in (e.g. VISA support).
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! which keeps error handling terse with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every error the acquisition pipeline can produce.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The layered configuration could not be parsed or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value failed validation, or the named file is missing.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure outside the CSV writers.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The analyzer failed to trigger, answer or close.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Frequency and magnitude traces of different lengths.
    #[error("Invalid sweep: {frequencies} frequencies for {magnitudes} magnitudes")]
    InvalidSweep {
        /// Number of frequency points received
        frequencies: usize,
        /// Number of magnitude points received
        magnitudes: usize,
    },

    /// A raw record or summary line could not be written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A pipeline worker terminated before the stop request.
    #[error("Pipeline worker failed: {0}")]
    WorkerFailed(String),

    /// The named cargo feature was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Teardown finished, but with the listed problems.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Whether the error only invalidates the current loop iteration.
    ///
    /// Recoverable errors are logged and the pipeline carries on with the next
    /// poll or the next queued sweep. Everything else is only expected during
    /// startup and aborts it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Instrument(_) | DaqError::InvalidSweep { .. } | DaqError::Persistence(_)
        )
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl From<csv::Error> for DaqError {
    fn from(err: csv::Error) -> Self {
        DaqError::Persistence(err.to_string())
    }
}
