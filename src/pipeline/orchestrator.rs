//! Lifecycle coordination of the acquisition pipeline.
//!
//! ```text
//! Idle --start--> Running --stop signal / worker fault--> StopRequested
//!      --workers joined, queue empty--> Drained --instrument closed--> Closed
//! ```
//!
//! The orchestrator owns the [`StopSignal`]; external triggers (operator
//! interrupt, termination request) go through [`Orchestrator::stop_signal`].
//! Shutdown blocks until everything already queued has been recorded.

use super::acquirer::{Acquirer, AcquirerReport};
use super::queue::handoff;
use super::recorder::{Recorder, RecorderReport};
use super::shutdown::StopSignal;
use crate::{
    config::AcquisitionConfig,
    core::{Instrument, SweepStore},
    data::SummaryLedger,
    error::{AppResult, DaqError},
};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Orchestrator lifecycle states. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Constructed, workers not started
    Idle,
    /// Acquirer and recorder running
    Running,
    /// Stop flag set; acquirer finishing, recorder draining
    StopRequested,
    /// Both workers joined and the queue is empty
    Drained,
    /// Instrument released; run complete
    Closed,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Summary of a complete run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// State the orchestrator finished in
    pub final_state: OrchestratorState,
    /// Producer counters (default if the acquirer task died)
    pub acquisition: AcquirerReport,
    /// Consumer counters (default if the recorder task died)
    pub recording: RecorderReport,
    /// Sweeps left in the queue at teardown; zero unless the recorder died
    pub undrained: usize,
    /// Whether the instrument was closed without error
    pub instrument_closed: bool,
    /// Whether a worker terminated on its own while running
    pub worker_fault: bool,
}

impl RunReport {
    /// Folds teardown problems into a single error.
    ///
    /// Exit status does not depend on this; it only feeds the final log line.
    pub fn shutdown_result(&self) -> AppResult<()> {
        let mut errors = Vec::new();
        if self.worker_fault {
            errors.push(DaqError::WorkerFailed(
                "terminated before the stop request".to_string(),
            ));
        }
        if self.undrained > 0 {
            errors.push(DaqError::Persistence(format!(
                "{} queued sweeps were never recorded",
                self.undrained
            )));
        }
        if !self.instrument_closed {
            errors.push(DaqError::Instrument(
                "instrument was not closed cleanly".to_string(),
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

/// Owns the pipeline lifecycle and the stop signal.
pub struct Orchestrator {
    stop: StopSignal,
    state: watch::Sender<OrchestratorState>,
    interval: Duration,
    dequeue_timeout: Duration,
}

impl Orchestrator {
    /// Creates an idle orchestrator with the configured cadence.
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self::with_timing(config.interval(), config.dequeue_timeout())
    }

    /// Creates an idle orchestrator with explicit timings.
    pub fn with_timing(interval: Duration, dequeue_timeout: Duration) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            stop: StopSignal::new(),
            state,
            interval,
            dequeue_timeout,
        }
    }

    /// Token that moves the pipeline from `Running` to `StopRequested`.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    fn transition(&self, next: OrchestratorState) {
        let previous = self.state.send_replace(next);
        info!(from = %previous, to = %next, "Pipeline state changed");
    }

    /// Runs the pipeline to completion.
    ///
    /// Starts the acquirer and recorder, idles until a stop is requested (or a
    /// worker dies), waits for the queue to drain, closes the instrument and
    /// returns. Never fails: teardown problems are logged and reported.
    pub async fn run(
        self,
        instrument: Box<dyn Instrument>,
        store: Box<dyn SweepStore>,
        ledger: SummaryLedger,
    ) -> RunReport {
        let (sender, receiver) = handoff();
        let acquirer = Acquirer::new(instrument, sender, self.stop.clone(), self.interval);
        let recorder = Recorder::new(
            store,
            ledger,
            receiver.clone(),
            self.stop.clone(),
            self.dequeue_timeout,
        );

        let mut acquirer_task = tokio::spawn(acquirer.run());
        let mut recorder_task = tokio::spawn(recorder.run());
        self.transition(OrchestratorState::Running);

        let mut acquirer_joined = None;
        let mut recorder_joined = None;
        tokio::select! {
            // Workers only return on their own after a stop; prefer that branch
            biased;
            () = self.stop.stopped() => info!("Stop requested, shutting down"),
            joined = &mut acquirer_task => {
                error!("Acquirer terminated while running");
                acquirer_joined = Some(joined);
            }
            joined = &mut recorder_task => {
                error!("Recorder terminated while running");
                recorder_joined = Some(joined);
            }
        }
        let worker_fault = acquirer_joined.is_some() || recorder_joined.is_some();

        self.stop.request_stop();
        self.transition(OrchestratorState::StopRequested);

        let acquirer_joined = match acquirer_joined {
            Some(joined) => joined,
            None => acquirer_task.await,
        };
        let recorder_joined = match recorder_joined {
            Some(joined) => joined,
            None => recorder_task.await,
        };

        let (instrument, acquisition) = match acquirer_joined {
            Ok((instrument, report)) => (Some(instrument), report),
            Err(e) => {
                error!(error = %e, "Acquirer task failed; instrument handle lost");
                (None, AcquirerReport::default())
            }
        };
        let recording = recorder_joined.unwrap_or_else(|e| {
            error!(error = %e, "Recorder task failed");
            RecorderReport::default()
        });

        let undrained = receiver.len();
        if undrained > 0 {
            error!(undrained, "Queue not drained; sweeps were lost");
        }
        self.transition(OrchestratorState::Drained);

        let instrument_closed = match instrument {
            Some(mut instrument) => match instrument.close().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Failed to close instrument");
                    false
                }
            },
            None => false,
        };

        self.stop.mark_stopped();
        self.transition(OrchestratorState::Closed);

        RunReport {
            final_state: self.state(),
            acquisition,
            recording,
            undrained,
            instrument_closed,
            worker_fault,
        }
    }
}
