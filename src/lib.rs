//! Core library for the sweep_daq application.
//!
//! Periodically triggers a network analyzer sweep, stores every trace as its
//! own CSV record and keeps a summary log tracking how the resonance minimum
//! drifts against the first reading of the run.
//!
//! - [`core`]: the sweep data model and the instrument/storage traits
//! - [`instrument`]: VISA and mock analyzer implementations
//! - [`data`]: raw sweep records and the summary ledger
//! - [`pipeline`]: acquirer, recorder, hand-off queue and orchestrator
//! - [`config`]: layered settings

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod instrument;
pub mod pipeline;
