//! Append-only summary log with baseline drift tracking.
//!
//! The ledger owns the running read count and the [`Baseline`] taken from the
//! first sweep it records. Each [`SummaryLedger::append`] computes a
//! [`SummaryRecord`] relative to that baseline and appends it as one CSV line.
//!
//! ```text
//! Timestamp,ReadCount,Min_dB,Frequency_Hz,TimeDelta_s,FrequencyShift_Hz
//! 2024-05-01 14:30:00,1,-1.00,100.00,0.00,0.00
//! 2024-05-01 14:30:01,2,-2.00,101.00,1.00,1.00
//! ```
//!
//! # Concurrency
//!
//! `SummaryLedger` is not safe for concurrent callers. Every mutating method
//! takes `&mut self`; the recorder owns the only instance for the lifetime of
//! the pipeline.

use crate::{
    core::RecordId,
    error::{AppResult, DaqError},
};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column headers of the summary log, in order.
pub const SUMMARY_HEADER: [&str; 6] = [
    "Timestamp",
    "ReadCount",
    "Min_dB",
    "Frequency_Hz",
    "TimeDelta_s",
    "FrequencyShift_Hz",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Zero point for drift tracking, taken from the first recorded sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Baseline {
    /// Timestamp of the first recorded sweep
    pub time: DateTime<Local>,
    /// Frequency of its minimum, in Hz
    pub frequency: f64,
}

/// One line of the summary log.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRecord {
    /// 1-based read count
    pub sequence: u64,
    /// Sweep timestamp
    pub timestamp: DateTime<Local>,
    /// Magnitude of the sweep minimum, in dB
    pub min_magnitude_db: f64,
    /// Frequency of the sweep minimum, in Hz
    pub frequency_hz: f64,
    /// Seconds since the baseline sweep
    pub time_delta_s: f64,
    /// Shift of the minimum relative to the baseline frequency, in Hz
    pub frequency_shift_hz: f64,
}

impl SummaryRecord {
    /// CSV fields in column order, numbers rounded to two decimals.
    pub fn to_row(&self) -> [String; 6] {
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.sequence.to_string(),
            format!("{:.2}", self.min_magnitude_db),
            format!("{:.2}", self.frequency_hz),
            format!("{:.2}", self.time_delta_s),
            format!("{:.2}", self.frequency_shift_hz),
        ]
    }

    /// Human-readable status line for the recorder's log output.
    pub fn status_line(&self, record: &RecordId) -> String {
        format!(
            "[{}] read #{}: minimum {:.2} dB at {:.2} Hz, saved {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.sequence,
            self.min_magnitude_db,
            self.frequency_hz,
            record
        )
    }
}

/// Append-only summary log plus the running count and baseline.
pub struct SummaryLedger {
    path: PathBuf,
    sequence: u64,
    baseline: Option<Baseline>,
}

impl SummaryLedger {
    /// Opens the ledger at `path`, writing the header if the file is new.
    ///
    /// An existing non-empty file is left untouched, so opening the same path
    /// any number of times never duplicates the header. A zero-length file is
    /// treated as new.
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        Self::ensure_header(&path)?;
        Ok(Self {
            path,
            sequence: 0,
            baseline: None,
        })
    }

    fn ensure_header(path: &Path) -> AppResult<()> {
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if std::fs::metadata(path)?.len() > 0 {
                    debug!(path = %path.display(), "Summary log already initialized");
                    return Ok(());
                }
                OpenOptions::new().append(true).open(path)?
            }
            Err(e) => return Err(e.into()),
        };
        Self::write_row(file, &SUMMARY_HEADER)?;
        info!(path = %path.display(), "Summary log created");
        Ok(())
    }

    fn write_row<I, T>(file: File, row: I) -> Result<(), csv::Error>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Baseline, once the first record has been written.
    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// Number of records appended by this instance.
    pub fn records_written(&self) -> u64 {
        self.sequence
    }

    /// Computes the next record and appends it to the log.
    ///
    /// The first successful call establishes the baseline and yields sequence 1
    /// with zero delta and shift. The sequence and baseline only advance once
    /// the line has been written, so a failed append leaves the ledger as it was.
    ///
    /// # Errors
    /// `DaqError::Persistence` if the line cannot be appended.
    pub fn append(
        &mut self,
        timestamp: DateTime<Local>,
        frequency_hz: f64,
        magnitude_db: f64,
    ) -> AppResult<SummaryRecord> {
        let (baseline, time_delta_s, frequency_shift_hz) = match self.baseline {
            Some(baseline) => {
                let elapsed = timestamp.signed_duration_since(baseline.time);
                let time_delta_s = elapsed
                    .num_microseconds()
                    .map_or(elapsed.num_seconds() as f64, |us| us as f64 / 1e6);
                (baseline, time_delta_s, frequency_hz - baseline.frequency)
            }
            // The baseline record is zero by definition, even for a non-finite frequency
            None => (
                Baseline {
                    time: timestamp,
                    frequency: frequency_hz,
                },
                0.0,
                0.0,
            ),
        };

        let record = SummaryRecord {
            sequence: self.sequence + 1,
            timestamp,
            min_magnitude_db: magnitude_db,
            frequency_hz,
            time_delta_s,
            frequency_shift_hz,
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                DaqError::Persistence(format!(
                    "Failed to open summary log {}: {e}",
                    self.path.display()
                ))
            })?;
        Self::write_row(file, record.to_row()).map_err(|e| {
            DaqError::Persistence(format!(
                "Failed to append to summary log {}: {e}",
                self.path.display()
            ))
        })?;

        self.sequence = record.sequence;
        if self.baseline.is_none() {
            info!(
                frequency_hz,
                time = %timestamp.format(TIMESTAMP_FORMAT),
                "Baseline established"
            );
            self.baseline = Some(baseline);
        }
        Ok(record)
    }
}
