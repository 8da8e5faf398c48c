//! CLI entry point for sweep_daq.
//!
//! Opens the analyzer, the raw record directory and the summary log, then
//! polls until interrupted. SIGINT or SIGTERM stops polling; every sweep
//! already acquired is still recorded before the process exits.
//!
//! # Usage
//!
//! ```bash
//! sweep_daq --visa "TCPIP0::10.0.0.5::hislip0::INSTR" --dir runs/cavity --interval 10
//! sweep_daq --mock --interval 1
//! sweep_daq --config sweep_daq.toml
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use figment::{providers::Serialized, Figment};
use std::path::PathBuf;
use sweep_daq::{
    config::{InstrumentKind, Settings},
    error::AppResult,
    data::{CsvSweepStore, SummaryLedger},
    instrument,
    pipeline::{Orchestrator, StopSignal},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep_daq")]
#[command(about = "Periodic network analyzer sweep acquisition with drift tracking", long_about = None)]
struct Cli {
    /// TOML configuration file; must exist [default: sweep_daq.toml, if present]
    #[arg(long)]
    config: Option<PathBuf>,

    /// VISA resource string of the analyzer
    #[arg(long, conflicts_with = "mock")]
    visa: Option<String>,

    /// Output directory for raw sweeps and the summary log
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Seconds between polls
    #[arg(long)]
    interval: Option<u64>,

    /// Use the synthetic analyzer instead of a VISA instrument
    #[arg(long)]
    mock: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Layers command-line overrides on top of file and environment settings.
    fn figment(&self) -> AppResult<Figment> {
        let mut figment = Settings::figment(self.config.as_deref())?;
        if let Some(resource) = &self.visa {
            figment = figment
                .merge(Serialized::default("instrument.resource", resource))
                .merge(Serialized::default("instrument.kind", InstrumentKind::Visa));
        }
        if self.mock {
            figment = figment.merge(Serialized::default("instrument.kind", InstrumentKind::Mock));
        }
        if let Some(dir) = &self.dir {
            figment = figment.merge(Serialized::default("storage.output_dir", dir));
        }
        if let Some(interval) = self.interval {
            figment = figment.merge(Serialized::default("acquisition.interval_secs", interval));
        }
        if let Some(level) = &self.log_level {
            figment = figment.merge(Serialized::default("application.log_level", level));
        }
        Ok(figment)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli
        .figment()
        .and_then(|figment| Settings::from_figment(&figment))
        .context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        instrument = ?settings.instrument.kind,
        output_dir = %settings.storage.output_dir.display(),
        interval_s = settings.acquisition.interval_secs,
        "Starting sweep acquisition"
    );

    // Any failure before the pipeline starts is fatal
    let store = CsvSweepStore::new(&settings.storage.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            settings.storage.output_dir.display()
        )
    })?;
    let summary_path = settings.storage.summary_path();
    let ledger = SummaryLedger::open(&summary_path)
        .with_context(|| format!("Failed to open summary log {}", summary_path.display()))?;
    let analyzer = instrument::open(&settings.instrument)
        .await
        .context("Failed to open instrument")?;

    let orchestrator = Orchestrator::new(&settings.acquisition);
    let signals = tokio::spawn(listen_for_signals(orchestrator.stop_signal()));

    let report = orchestrator
        .run(analyzer, Box::new(store), ledger)
        .await;
    signals.abort();

    info!(
        polls = report.acquisition.polls,
        acquired = report.acquisition.sweeps_acquired,
        recorded = report.recording.sweeps_recorded,
        persistence_failures = report.recording.persistence_failures(),
        "Acquisition finished"
    );
    if let Err(e) = report.shutdown_result() {
        warn!(error = %e, "Shutdown completed with problems");
    }
    Ok(())
}

fn on_signal(stop: &StopSignal, name: &str) {
    if stop.request_stop() {
        info!(signal = name, "Stopping; queued sweeps will still be recorded");
    } else {
        warn!(signal = name, "Shutdown already in progress, ignoring");
    }
}

#[cfg(unix)]
async fn listen_for_signals(stop: StopSignal) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

    loop {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        on_signal(&stop, name);
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(stop: StopSignal) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        on_signal(&stop, "Ctrl+C");
    }
}
