//! Instrument implementations.
//!
//! - [`visa::VisaAnalyzer`]: SCPI network analyzer over VISA (`instrument_visa` feature)
//! - [`mock::MockAnalyzer`]: synthetic analyzer for tests and dry runs

pub mod mock;
pub mod visa;

use crate::config::{InstrumentConfig, InstrumentKind};
use crate::core::Instrument;
use crate::error::AppResult;
use tracing::info;

pub use mock::MockAnalyzer;
pub use visa::VisaAnalyzer;

/// Opens the instrument selected by `config.kind`.
///
/// Any failure here is an initialization failure: the caller must abort
/// before starting the pipeline.
pub async fn open(config: &InstrumentConfig) -> AppResult<Box<dyn Instrument>> {
    let instrument: Box<dyn Instrument> = match config.kind {
        InstrumentKind::Visa => Box::new(VisaAnalyzer::open(config).await?),
        InstrumentKind::Mock => Box::new(MockAnalyzer::new()),
    };
    info!(instrument = %instrument.name(), "Instrument opened");
    Ok(instrument)
}
