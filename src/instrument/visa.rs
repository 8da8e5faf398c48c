//! VISA network analyzer implementation.
//!
//! This module provides an `Instrument` implementation for network analyzers that
//! speak SCPI over VISA (HiSLIP, VXI-11, USBTMC, GPIB). It uses the `visa-rs`
//! crate to communicate with the installed VISA library and is only functional
//! when built with the `instrument_visa` feature.
//!
//! ## Configuration
//!
//! ```toml
//! [instrument]
//! kind = "visa"
//! resource = "TCPIP0::Vega::hislip_PXI0_CHASSIS1_SLOT1_INDEX0::INSTR"
//! timeout_ms = 10000
//! trigger_command = "SENS1:SWE:MODE SING"
//! complete_query = "*OPC?"
//! data_query = "CALC1:MEAS1:DATA:FDATA?"
//! x_values_query = "CALC1:MEAS1:X:VAL?"
//! ```
//!
//! A poll writes `trigger_command`, then blocks on `complete_query` until the
//! analyzer reports the sweep finished. The trace is read back with
//! `data_query` (magnitudes) and `x_values_query` (frequencies), both returned
//! as comma-separated ASCII floats.

use crate::{
    config::InstrumentConfig,
    error::{AppResult, DaqError},
};

/// Parses an ASCII SCPI block such as `"-1.5E+01,-2.25E+01\n"` into floats.
pub fn parse_ascii_values(response: &str) -> AppResult<Vec<f64>> {
    let trimmed = response.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        return Err(DaqError::Instrument("empty response".to_string()));
    }
    trimmed
        .split(',')
        .map(|token| {
            let token = token.trim();
            token.parse::<f64>().map_err(|e| {
                DaqError::Instrument(format!("invalid value '{token}' in response: {e}"))
            })
        })
        .collect()
}

#[cfg(feature = "instrument_visa")]
mod visa_enabled {
    use super::*;
    use crate::core::Instrument;
    use async_trait::async_trait;
    use std::ffi::CString;
    use std::io::{BufRead, BufReader, Write};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tracing::{debug, info};
    use visa_rs::prelude::*;

    /// Open session plus the resource manager it was opened from.
    ///
    /// Closing the resource manager closes every session it owns, so the two
    /// are kept and dropped together (session first).
    struct Session {
        instr: visa_rs::Instrument,
        _rm: DefaultRM,
    }

    impl Session {
        fn write_line(&mut self, command: &str) -> AppResult<()> {
            self.instr
                .write_all(format!("{command}\n").as_bytes())
                .map_err(|e| DaqError::Instrument(format!("write '{command}' failed: {e}")))
        }

        fn query(&mut self, command: &str) -> AppResult<String> {
            self.write_line(command)?;
            let mut reader = BufReader::new(&self.instr);
            let mut line = String::new();
            reader
                .read_line(&mut line)
                .map_err(|e| DaqError::Instrument(format!("query '{command}' failed: {e}")))?;
            debug!("VISA query '{}' -> {} bytes", command, line.len());
            Ok(line)
        }
    }

    /// An `Instrument` implementation for SCPI network analyzers over VISA.
    pub struct VisaAnalyzer {
        resource: String,
        timeout: Duration,
        config: InstrumentConfig,
        session: Option<Arc<Mutex<Session>>>,
    }

    impl VisaAnalyzer {
        /// Opens the configured VISA resource.
        ///
        /// # Errors
        /// Returns `DaqError::Instrument` if the resource manager or the
        /// resource cannot be opened.
        pub async fn open(config: &InstrumentConfig) -> AppResult<Self> {
            info!("Connecting to VISA instrument: {}", config.resource);
            let resource = config.resource.clone();
            let timeout = config.timeout();

            let session = tokio::task::spawn_blocking(move || -> AppResult<Session> {
                let rm = DefaultRM::new().map_err(|e| {
                    DaqError::Instrument(format!("Failed to create VISA resource manager: {e}"))
                })?;
                let c_string = CString::new(resource.as_str()).map_err(|e| {
                    DaqError::Configuration(format!("invalid VISA resource string: {e}"))
                })?;
                let visa_string = visa_rs::VisaString::from(c_string);
                let instr = rm
                    .open(&visa_string, AccessMode::NO_LOCK, timeout)
                    .map_err(|e| {
                        DaqError::Instrument(format!(
                            "Failed to open VISA resource '{resource}': {e}"
                        ))
                    })?;
                Ok(Session { instr, _rm: rm })
            })
            .await
            .map_err(|e| DaqError::Instrument(format!("VISA open task failed: {e}")))??;

            Ok(Self {
                resource: config.resource.clone(),
                timeout,
                config: config.clone(),
                session: Some(Arc::new(Mutex::new(session))),
            })
        }

        /// Runs blocking VISA I/O on a dedicated thread, bounded by the I/O timeout.
        async fn with_session<T, F>(&self, op: &str, f: F) -> AppResult<T>
        where
            T: Send + 'static,
            F: FnOnce(&mut Session) -> AppResult<T> + Send + 'static,
        {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| {
                    DaqError::Instrument(format!("Not connected to '{}'", self.resource))
                })?
                .clone();

            let task = tokio::task::spawn_blocking(move || {
                let mut guard = session.blocking_lock();
                f(&mut guard)
            });

            match tokio::time::timeout(self.timeout, task).await {
                Ok(joined) => joined
                    .map_err(|e| DaqError::Instrument(format!("VISA {op} task failed: {e}")))?,
                Err(_) => Err(DaqError::Instrument(format!(
                    "VISA {op} timed out after {:?}",
                    self.timeout
                ))),
            }
        }
    }

    #[async_trait]
    impl Instrument for VisaAnalyzer {
        fn name(&self) -> String {
            format!("VISA analyzer {}", self.resource)
        }

        async fn trigger_and_wait_sweep(&mut self) -> AppResult<()> {
            let trigger = self.config.trigger_command.clone();
            let complete = self.config.complete_query.clone();
            self.with_session("trigger", move |session| {
                session.write_line(&trigger)?;
                session.query(&complete)?;
                Ok(())
            })
            .await
        }

        async fn read_sweep(&mut self) -> AppResult<(Vec<f64>, Vec<f64>)> {
            let data_query = self.config.data_query.clone();
            let x_query = self.config.x_values_query.clone();
            self.with_session("read", move |session| {
                let magnitudes = parse_ascii_values(&session.query(&data_query)?)?;
                let frequencies = parse_ascii_values(&session.query(&x_query)?)?;
                Ok((frequencies, magnitudes))
            })
            .await
        }

        async fn close(&mut self) -> AppResult<()> {
            info!("Disconnecting from VISA instrument {}.", self.resource);
            // The session closes once the last reference is released, which may
            // be a blocking call that outlived its timeout.
            self.session = None;
            Ok(())
        }
    }
}

#[cfg(not(feature = "instrument_visa"))]
mod visa_disabled {
    use super::*;
    use crate::core::Instrument;
    use async_trait::async_trait;

    /// Placeholder used when VISA support is not compiled in.
    pub struct VisaAnalyzer;

    impl VisaAnalyzer {
        /// Always fails with [`DaqError::FeatureNotEnabled`].
        pub async fn open(_config: &InstrumentConfig) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
        }
    }

    #[async_trait]
    impl Instrument for VisaAnalyzer {
        fn name(&self) -> String {
            "VISA analyzer (disabled)".to_string()
        }

        async fn trigger_and_wait_sweep(&mut self) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
        }

        async fn read_sweep(&mut self) -> AppResult<(Vec<f64>, Vec<f64>)> {
            Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
        }

        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }
}

#[cfg(feature = "instrument_visa")]
pub use visa_enabled::VisaAnalyzer;

#[cfg(not(feature = "instrument_visa"))]
pub use visa_disabled::VisaAnalyzer;
