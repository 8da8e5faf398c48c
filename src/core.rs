//! Core traits and data types for the sweep acquisition pipeline.
//!
//! This module defines the foundational abstractions shared by the producer
//! and consumer sides of the pipeline:
//!
//! - [`Sweep`]: one validated trace of paired (frequency, magnitude) samples
//! - [`MinimumPoint`]: the deepest point of a sweep
//! - [`RecordId`]: deterministic name of a persisted raw sweep
//! - [`Instrument`]: the analyzer capability driven by the acquirer
//! - [`SweepStore`]: persistence backend for raw sweeps driven by the recorder
//!
//! # Data Flow
//!
//! ```text
//! Instrument --> Acquirer --[Sweep]--> HandoffQueue --> Recorder --> SweepStore
//!                                                                \-> SummaryLedger
//! ```
//!
//! # Thread Safety
//!
//! Both traits require `Send` so that an implementation can be moved into the
//! worker task that owns it. Neither requires `Sync`: each is accessed by exactly
//! one worker.

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;

// =============================================================================
// Basic Data Types
// =============================================================================

/// One full set of paired samples captured from a single trigger.
///
/// A `Sweep` is immutable once built. It is created by the acquirer, moved
/// through the hand-off queue, and consumed exactly once by the recorder.
///
/// # Invariant
///
/// `frequencies.len() == magnitudes.len() >= 1`, enforced by [`Sweep::new`].
#[derive(Clone, Debug, PartialEq)]
pub struct Sweep {
    timestamp: DateTime<Local>,
    frequencies: Vec<f64>,
    magnitudes: Vec<f64>,
}

impl Sweep {
    /// Builds a sweep, rejecting traces that are empty or of unequal length.
    pub fn new(
        timestamp: DateTime<Local>,
        frequencies: Vec<f64>,
        magnitudes: Vec<f64>,
    ) -> AppResult<Self> {
        if frequencies.is_empty() || frequencies.len() != magnitudes.len() {
            return Err(DaqError::InvalidSweep {
                frequencies: frequencies.len(),
                magnitudes: magnitudes.len(),
            });
        }
        Ok(Self {
            timestamp,
            frequencies,
            magnitudes,
        })
    }

    /// Local time at which the sweep was read back from the instrument.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Stimulus axis, in Hz.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Formatted trace, in dB.
    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    /// Number of sample pairs (always at least one).
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// Always false; kept alongside `len` for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Iterates over `(frequency, magnitude)` pairs in acquisition order.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies
            .iter()
            .copied()
            .zip(self.magnitudes.iter().copied())
    }

    /// Finds the sample with the lowest magnitude.
    ///
    /// Ties resolve to the lowest index. NaN magnitudes never win against a
    /// real value; if every magnitude is NaN the first sample is returned.
    pub fn minimum(&self) -> MinimumPoint {
        let mut best = 0;
        for (i, &magnitude) in self.magnitudes.iter().enumerate().skip(1) {
            let current = self.magnitudes[best];
            if magnitude < current || (current.is_nan() && !magnitude.is_nan()) {
                best = i;
            }
        }
        MinimumPoint {
            frequency: self.frequencies[best],
            magnitude: self.magnitudes[best],
        }
    }
}

/// The `(frequency, magnitude)` pair at the deepest point of a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinimumPoint {
    /// Frequency in Hz
    pub frequency: f64,
    /// Magnitude in dB
    pub magnitude: f64,
}

/// Identifier of a persisted raw sweep: `{YYYYMMDD_HHMMSS}_{round(frequency)}Hz`.
///
/// The same timestamp (to the second) and rounded frequency always map to the
/// same identifier, so re-recording a sweep overwrites its previous record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(String);

impl RecordId {
    /// Derives the identifier from the sweep timestamp and the frequency of its minimum.
    pub fn new(timestamp: DateTime<Local>, frequency_hz: f64) -> Self {
        Self(format!(
            "{}_{}Hz",
            timestamp.format("%Y%m%d_%H%M%S"),
            frequency_hz.round() as i64
        ))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// A swept-frequency instrument (e.g. a vector network analyzer).
///
/// The acquirer is the only caller. Implementations may block inside the
/// async methods for the duration of a sweep; there is no forced preemption
/// of in-flight instrument I/O.
#[async_trait]
pub trait Instrument: Send {
    /// Human-readable instrument name used in log lines.
    fn name(&self) -> String;

    /// Triggers a single sweep and returns once the instrument reports completion.
    async fn trigger_and_wait_sweep(&mut self) -> AppResult<()>;

    /// Reads back the last completed sweep as `(frequencies, magnitudes)`.
    async fn read_sweep(&mut self) -> AppResult<(Vec<f64>, Vec<f64>)>;

    /// Releases the instrument connection.
    async fn close(&mut self) -> AppResult<()>;
}

/// Persistence backend for raw sweeps.
#[async_trait]
pub trait SweepStore: Send {
    /// Writes every sample pair of `sweep` under `id`, replacing any previous
    /// record with the same identifier.
    async fn write_sweep(&mut self, id: &RecordId, sweep: &Sweep) -> AppResult<()>;
}
