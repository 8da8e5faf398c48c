//! Raw sweep storage.
//!
//! Every recorded sweep lands in its own CSV file, `<output_dir>/<RecordId>.csv`,
//! with a `Frequency (Hz),Magnitude (dB)` header followed by one row per sample
//! pair in acquisition order.
use crate::{
    core::{RecordId, Sweep, SweepStore},
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column headers of a raw sweep record.
pub const SWEEP_HEADER: [&str; 2] = ["Frequency (Hz)", "Magnitude (dB)"];

/// [`SweepStore`] writing one CSV file per sweep.
pub struct CsvSweepStore {
    dir: PathBuf,
}

impl CsvSweepStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory that holds the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a record with the given identifier is written to.
    pub fn path_for(&self, id: &RecordId) -> PathBuf {
        self.dir.join(format!("{id}.csv"))
    }

    fn write_file(path: &Path, sweep: &Sweep) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        writer.write_record(SWEEP_HEADER)?;
        for (frequency, magnitude) in sweep.samples() {
            writer.write_record([frequency.to_string(), magnitude.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl SweepStore for CsvSweepStore {
    async fn write_sweep(&mut self, id: &RecordId, sweep: &Sweep) -> AppResult<()> {
        let path = self.path_for(id);
        Self::write_file(&path, sweep).map_err(|e| {
            DaqError::Persistence(format!("Failed to write sweep to {}: {e}", path.display()))
        })?;
        debug!(record = %id, samples = sweep.len(), "Raw sweep written");
        Ok(())
    }
}
