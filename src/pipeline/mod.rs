//! Producer/consumer acquisition pipeline.
//!
//! The [`Acquirer`] polls the instrument and enqueues each [`Sweep`](crate::core::Sweep);
//! the [`Recorder`] dequeues, persists and summarizes them. The
//! [`Orchestrator`] starts both, relays the stop request and tears the
//! pipeline down once the queue is drained.

pub mod acquirer;
pub mod orchestrator;
pub mod queue;
pub mod recorder;
pub mod shutdown;

pub use acquirer::{Acquirer, AcquirerReport, PollStage};
pub use orchestrator::{Orchestrator, OrchestratorState, RunReport};
pub use queue::{handoff, HandoffReceiver, HandoffSender};
pub use recorder::{RecordOutcome, Recorder, RecorderReport};
pub use shutdown::{RunState, StopSignal};
