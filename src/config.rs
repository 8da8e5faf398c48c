//! Configuration using Figment.
//!
//! Settings are layered, lowest precedence first:
//! 1. built-in defaults ([`Settings::default`])
//! 2. a TOML file: an explicit path must exist, the default
//!    [`DEFAULT_CONFIG_FILE`] is skipped when absent
//! 3. environment variables prefixed with `SWEEPDAQ_`
//! 4. explicit overrides (the command line), merged by the caller
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! SWEEPDAQ_APPLICATION__LOG_LEVEL=debug
//! SWEEPDAQ_ACQUISITION__INTERVAL_SECS=30
//! SWEEPDAQ_STORAGE__OUTPUT_DIR=/var/lib/sweeps
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sweep_daq::config::Settings;
//!
//! let settings = Settings::load(Some("sweep_daq.toml"))?;
//! println!("Polling every {}s", settings.acquisition.interval_secs);
//! # Ok::<(), sweep_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file read when none is given explicitly; skipped if absent.
pub const DEFAULT_CONFIG_FILE: &str = "sweep_daq.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SWEEPDAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Analyzer connection and SCPI command set
    pub instrument: InstrumentConfig,
    /// Output locations
    pub storage: StorageConfig,
    /// Poll cadence and queue timing
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Which [`Instrument`](crate::core::Instrument) implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// A VISA resource speaking SCPI
    Visa,
    /// The synthetic analyzer
    Mock,
}

/// Analyzer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Instrument backend
    pub kind: InstrumentKind,
    /// VISA resource string
    pub resource: String,
    /// VISA I/O timeout in milliseconds; must cover a full sweep
    pub timeout_ms: u64,
    /// Arms a single sweep
    pub trigger_command: String,
    /// Blocks until the pending sweep completes
    pub complete_query: String,
    /// Returns the formatted trace (magnitudes)
    pub data_query: String,
    /// Returns the stimulus axis (frequencies)
    pub x_values_query: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            kind: InstrumentKind::Visa,
            resource: "TCPIP0::Vega::hislip_PXI0_CHASSIS1_SLOT1_INDEX0::INSTR".to_string(),
            timeout_ms: 10_000,
            trigger_command: "SENS1:SWE:MODE SING".to_string(),
            complete_query: "*OPC?".to_string(),
            data_query: "CALC1:MEAS1:DATA:FDATA?".to_string(),
            x_values_query: "CALC1:MEAS1:X:VAL?".to_string(),
        }
    }
}

impl InstrumentConfig {
    /// VISA I/O timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for raw sweep records and the summary log
    pub output_dir: PathBuf,
    /// File name of the summary log inside `output_dir`
    pub summary_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            summary_file: "summary.csv".to_string(),
        }
    }
}

impl StorageConfig {
    /// Full path of the summary log.
    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(&self.summary_file)
    }
}

/// Acquisition timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Seconds to wait after each poll, successful or not
    pub interval_secs: u64,
    /// Upper bound on a single recorder dequeue wait, in milliseconds
    pub dequeue_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            dequeue_timeout_ms: 1000,
        }
    }
}

impl AcquisitionConfig {
    /// Poll interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Recorder dequeue timeout as a `Duration`.
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

impl Settings {
    /// Base figment: defaults, then the TOML file, then the environment.
    ///
    /// `Some(path)` names a file that must exist. `None` reads
    /// [`DEFAULT_CONFIG_FILE`] if it is present. Callers with extra overrides
    /// (the CLI) merge them on top before extracting.
    pub fn figment(path: Option<&Path>) -> AppResult<Figment> {
        let file = match path {
            Some(path) if !path.is_file() => {
                return Err(DaqError::Configuration(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            Some(path) => path,
            None => Path::new(DEFAULT_CONFIG_FILE),
        };
        Ok(Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Loads and validates settings from defaults, `path` and the environment.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> AppResult<Self> {
        let figment = Self::figment(path.as_ref().map(AsRef::as_ref))?;
        Self::from_figment(&figment)
    }

    /// Extracts and validates settings from an already assembled figment.
    pub fn from_figment(figment: &Figment) -> AppResult<Self> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - A VISA instrument has a resource string and non-empty SCPI commands
    /// - Timeouts and the poll interval are non-zero
    /// - The summary file name is non-empty
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.instrument.kind == InstrumentKind::Visa {
            if self.instrument.resource.trim().is_empty() {
                return Err(DaqError::Configuration(
                    "instrument.resource cannot be empty for a VISA instrument".to_string(),
                ));
            }
            let commands = [
                ("trigger_command", &self.instrument.trigger_command),
                ("complete_query", &self.instrument.complete_query),
                ("data_query", &self.instrument.data_query),
                ("x_values_query", &self.instrument.x_values_query),
            ];
            for (key, command) in commands {
                if command.trim().is_empty() {
                    return Err(DaqError::Configuration(format!(
                        "instrument.{key} cannot be empty"
                    )));
                }
            }
            if self.instrument.timeout_ms == 0 {
                return Err(DaqError::Configuration(
                    "instrument.timeout_ms must be greater than zero".to_string(),
                ));
            }
        }

        if self.acquisition.interval_secs == 0 {
            return Err(DaqError::Configuration(
                "acquisition.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.acquisition.dequeue_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.dequeue_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.storage.summary_file.trim().is_empty() {
            return Err(DaqError::Configuration(
                "storage.summary_file cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
