//! Producer side: polls the instrument on a fixed cadence.
use super::queue::HandoffSender;
use super::shutdown::StopSignal;
use crate::{
    core::{Instrument, Sweep},
    error::DaqError,
};
use chrono::Local;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Step of a poll that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStage {
    /// Triggering the sweep or waiting for it to complete
    Trigger,
    /// Reading the trace back
    Read,
    /// Pairing frequencies with magnitudes
    Validate,
}

impl fmt::Display for PollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollStage::Trigger => "trigger",
            PollStage::Read => "read",
            PollStage::Validate => "validate",
        })
    }
}

/// Counters returned when the acquirer stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcquirerReport {
    /// Polls attempted
    pub polls: u64,
    /// Sweeps handed to the recorder
    pub sweeps_acquired: u64,
    /// Polls skipped because of an instrument error
    pub polls_failed: u64,
}

/// Polls the instrument and hands each sweep to the recorder.
pub struct Acquirer {
    instrument: Box<dyn Instrument>,
    queue: HandoffSender<Sweep>,
    stop: StopSignal,
    interval: Duration,
    report: AcquirerReport,
}

impl Acquirer {
    /// Creates an acquirer polling `instrument` every `interval`.
    pub fn new(
        instrument: Box<dyn Instrument>,
        queue: HandoffSender<Sweep>,
        stop: StopSignal,
        interval: Duration,
    ) -> Self {
        Self {
            instrument,
            queue,
            stop,
            interval,
            report: AcquirerReport::default(),
        }
    }

    /// Triggers one sweep, reads it back and stamps it with the current time.
    pub async fn poll_once(&mut self) -> Result<Sweep, (PollStage, DaqError)> {
        self.instrument
            .trigger_and_wait_sweep()
            .await
            .map_err(|e| (PollStage::Trigger, e))?;
        let (frequencies, magnitudes) = self
            .instrument
            .read_sweep()
            .await
            .map_err(|e| (PollStage::Read, e))?;
        Sweep::new(Local::now(), frequencies, magnitudes).map_err(|e| (PollStage::Validate, e))
    }

    /// Runs until a stop is requested, then hands the instrument back for closing.
    ///
    /// A failed poll is logged and skipped; the loop then waits out the same
    /// interval as after a successful poll. The wait ends early on a stop request.
    pub async fn run(mut self) -> (Box<dyn Instrument>, AcquirerReport) {
        info!(
            instrument = %self.instrument.name(),
            interval_s = self.interval.as_secs_f64(),
            "Acquirer started"
        );

        while !self.stop.is_stop_requested() {
            self.report.polls += 1;
            match self.poll_once().await {
                Ok(sweep) => {
                    debug!(samples = sweep.len(), "Sweep acquired");
                    self.queue.enqueue(sweep);
                    self.report.sweeps_acquired += 1;
                }
                Err((stage, error)) => {
                    self.report.polls_failed += 1;
                    let time = Local::now().format("%Y-%m-%d %H:%M:%S");
                    if error.is_recoverable() {
                        warn!(%stage, %error, %time, "Poll failed, retrying after interval");
                    } else {
                        // Retrying cannot help; still only a stop ends the loop
                        error!(%stage, %error, %time, "Poll failed with a non-recoverable error");
                    }
                }
            }

            tokio::select! {
                () = self.stop.stopped() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            polls = self.report.polls,
            acquired = self.report.sweeps_acquired,
            failed = self.report.polls_failed,
            "Acquirer stopped"
        );
        (self.instrument, self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::instrument::MockAnalyzer;
    use crate::pipeline::queue::handoff;
    use async_trait::async_trait;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_poll_once_builds_sweep() {
        let (tx, _rx) = handoff();
        let mut acquirer = Acquirer::new(
            Box::new(MockAnalyzer::new().with_points(11)),
            tx,
            StopSignal::new(),
            Duration::from_secs(1),
        );
        let sweep = acquirer.poll_once().await.unwrap();
        assert_eq!(sweep.len(), 11);
    }

    #[tokio::test]
    async fn test_poll_once_reports_failing_stage() {
        let (tx, _rx) = handoff();
        let mut acquirer = Acquirer::new(
            Box::new(MockAnalyzer::new().fail_trigger_on([0]).fail_read_on([1])),
            tx,
            StopSignal::new(),
            Duration::from_secs(1),
        );
        let (stage, _) = acquirer.poll_once().await.unwrap_err();
        assert_eq!(stage, PollStage::Trigger);
        let (stage, _) = acquirer.poll_once().await.unwrap_err();
        assert_eq!(stage, PollStage::Read);
        assert!(acquirer.poll_once().await.is_ok());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_poll_is_skipped() {
        let (tx, rx) = handoff();
        let stop = StopSignal::new();
        let analyzer = MockAnalyzer::new().fail_read_on([1]);
        let probe = analyzer.probe();
        let acquirer = Acquirer::new(
            Box::new(analyzer),
            tx,
            stop.clone(),
            Duration::from_millis(10),
        );

        // Same task as the test so the events land in the captured span
        let stopper = async {
            while probe.triggers() < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            stop.request_stop();
        };
        let ((_instrument, report), ()) = tokio::join!(acquirer.run(), stopper);

        assert_eq!(report.polls, 3);
        assert_eq!(report.polls_failed, 1);
        assert_eq!(report.sweeps_acquired, 2);
        assert_eq!(rx.len(), 2);
        assert!(logs_contain("Poll failed"));
        assert!(logs_contain("stage=read"));
    }

    /// Analyzer that was never compiled in.
    struct UnavailableAnalyzer;

    #[async_trait]
    impl Instrument for UnavailableAnalyzer {
        fn name(&self) -> String {
            "unavailable".to_string()
        }

        async fn trigger_and_wait_sweep(&mut self) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
        }

        async fn read_sweep(&mut self) -> AppResult<(Vec<f64>, Vec<f64>)> {
            Ok((Vec::new(), Vec::new()))
        }

        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_non_recoverable_poll_error_logs_at_error() {
        let (tx, rx) = handoff();
        let stop = StopSignal::new();
        let acquirer = Acquirer::new(
            Box::new(UnavailableAnalyzer),
            tx,
            stop.clone(),
            Duration::from_millis(5),
        );

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stop.request_stop();
        };
        let ((_instrument, report), ()) = tokio::join!(acquirer.run(), stopper);

        assert!(report.polls >= 1);
        assert_eq!(report.polls_failed, report.polls);
        assert!(rx.is_empty());
        assert!(logs_contain("Poll failed with a non-recoverable error"));
        assert!(logs_contain("ERROR"));
        assert!(!logs_contain("retrying after interval"));
    }

    #[tokio::test]
    async fn test_stop_interrupts_interval_wait() {
        let (tx, rx) = handoff();
        let stop = StopSignal::new();
        let acquirer = Acquirer::new(
            Box::new(MockAnalyzer::new()),
            tx,
            stop.clone(),
            Duration::from_secs(3600),
        );
        let task = tokio::spawn(acquirer.run());

        while rx.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.request_stop();

        let (_instrument, report) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("acquirer left its wait promptly")
            .unwrap();
        assert_eq!(report.polls, 1);
        assert_eq!(report.sweeps_acquired, 1);
    }

    #[tokio::test]
    async fn test_no_poll_after_stop_requested_up_front() {
        let (tx, rx) = handoff();
        let stop = StopSignal::new();
        stop.request_stop();
        let analyzer = MockAnalyzer::new();
        let probe = analyzer.probe();

        let (_instrument, report) =
            Acquirer::new(Box::new(analyzer), tx, stop, Duration::from_millis(1))
                .run()
                .await;

        assert_eq!(report, AcquirerReport::default());
        assert_eq!(probe.triggers(), 0);
        assert!(rx.is_empty());
        assert!(!rx.has_senders());
    }
}
