//! Cooperative stop signal shared by the orchestrator and both workers.
//!
//! The signal is tri-state: [`RunState::Running`] until someone calls
//! [`StopSignal::request_stop`], then [`RunState::StopRequested`] while the
//! pipeline drains, and finally [`RunState::Stopped`] once the orchestrator has
//! torn everything down. Workers only ever read it, at their defined check points.

use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the pipeline as seen by its workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Workers keep polling and recording
    Running,
    /// No new polls; the recorder drains what is queued
    StopRequested,
    /// Both workers have terminated and the queue is empty
    Stopped,
}

/// Clonable cancellation token backed by a `watch` channel.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<RunState>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Creates a signal in the `Running` state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    /// True once a stop has been requested (or the pipeline has fully stopped).
    pub fn is_stop_requested(&self) -> bool {
        self.state() != RunState::Running
    }

    /// Requests a stop. Idempotent.
    ///
    /// Returns `true` only for the call that actually moved the state out of
    /// `Running`.
    pub fn request_stop(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::StopRequested;
                true
            } else {
                false
            }
        })
    }

    /// Marks the pipeline fully stopped. Terminal.
    pub fn mark_stopped(&self) {
        self.tx.send_replace(RunState::Stopped);
    }

    /// Resolves as soon as a stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close underneath us
        let _ = rx.wait_for(|state| *state != RunState::Running).await;
    }
}
