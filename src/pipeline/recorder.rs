//! Consumer side: persists each sweep and appends it to the summary ledger.
use super::queue::HandoffReceiver;
use super::shutdown::StopSignal;
use crate::{
    core::{RecordId, Sweep, SweepStore},
    data::{SummaryLedger, SummaryRecord},
    error::AppResult,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// What became of one dequeued sweep.
#[derive(Debug)]
pub struct RecordOutcome {
    /// Identifier the raw sweep was (or would have been) stored under
    pub id: RecordId,
    /// Result of writing the raw sweep
    pub raw: AppResult<()>,
    /// Result of appending to the summary ledger
    pub summary: AppResult<SummaryRecord>,
}

impl RecordOutcome {
    /// Both the raw record and the summary line were written.
    pub fn is_complete(&self) -> bool {
        self.raw.is_ok() && self.summary.is_ok()
    }
}

/// Counters returned when the recorder stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderReport {
    /// Sweeps taken off the queue
    pub sweeps_dequeued: u64,
    /// Sweeps with both raw record and summary line written
    pub sweeps_recorded: u64,
    /// Raw record writes that failed
    pub raw_failures: u64,
    /// Summary appends that failed
    pub summary_failures: u64,
}

impl RecorderReport {
    /// Sweeps with at least one failed write.
    pub fn persistence_failures(&self) -> u64 {
        self.sweeps_dequeued - self.sweeps_recorded
    }
}

/// Writes dequeued sweeps to the raw store and the summary ledger.
pub struct Recorder {
    store: Box<dyn SweepStore>,
    ledger: SummaryLedger,
    queue: HandoffReceiver<Sweep>,
    stop: StopSignal,
    dequeue_timeout: Duration,
    report: RecorderReport,
}

impl Recorder {
    /// Creates a recorder draining `queue` into `store` and `ledger`.
    pub fn new(
        store: Box<dyn SweepStore>,
        ledger: SummaryLedger,
        queue: HandoffReceiver<Sweep>,
        stop: StopSignal,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            queue,
            stop,
            dequeue_timeout,
            report: RecorderReport::default(),
        }
    }

    /// Processes one sweep: raw record, summary line, status line.
    ///
    /// A failed raw write does not prevent the summary append. Failures are
    /// logged here and returned in the outcome; neither is fatal.
    pub async fn record(&mut self, sweep: Sweep) -> RecordOutcome {
        let minimum = sweep.minimum();
        let timestamp = sweep.timestamp();
        let id = RecordId::new(timestamp, minimum.frequency);

        let raw = self.store.write_sweep(&id, &sweep).await;
        if let Err(e) = &raw {
            error!(stage = "raw", record = %id, error = %e, "Failed to persist sweep");
        }

        let summary = self
            .ledger
            .append(timestamp, minimum.frequency, minimum.magnitude);
        match &summary {
            Ok(record) => info!("{}", record.status_line(&id)),
            Err(e) => error!(stage = "summary", record = %id, error = %e, "Failed to append summary"),
        }

        RecordOutcome { id, raw, summary }
    }

    /// Whether the loop may exit: stop requested and nothing left to drain.
    ///
    /// A live producer can still enqueue a sweep it was acquiring when the
    /// stop arrived, so the queue only counts as drained once every sender
    /// is gone.
    fn drained(&self) -> bool {
        self.stop.is_stop_requested() && self.queue.is_empty() && !self.queue.has_senders()
    }

    /// Drains the queue until a stop is requested and nothing is left.
    pub async fn run(mut self) -> RecorderReport {
        info!(ledger = %self.ledger.path().display(), "Recorder started");

        while !self.drained() {
            let Some(sweep) = self.queue.dequeue_timeout(self.dequeue_timeout).await else {
                if !self.queue.has_senders() {
                    // Producer gone: nothing can arrive before the stop request
                    let _ = tokio::time::timeout(self.dequeue_timeout, self.stop.stopped()).await;
                }
                continue;
            };
            if self.stop.is_stop_requested() {
                debug!(remaining = self.queue.len(), "Draining queued sweep");
            }

            let outcome = self.record(sweep).await;
            self.report.sweeps_dequeued += 1;
            if outcome.raw.is_err() {
                self.report.raw_failures += 1;
            }
            if outcome.summary.is_err() {
                self.report.summary_failures += 1;
            }
            if outcome.is_complete() {
                self.report.sweeps_recorded += 1;
            }
        }

        info!(
            recorded = self.report.sweeps_recorded,
            failed = self.report.persistence_failures(),
            "Recorder stopped, queue drained"
        );
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CsvSweepStore;
    use crate::error::DaqError;
    use crate::pipeline::queue::{handoff, HandoffSender};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    /// Store that fails on selected write indices.
    struct FlakyStore {
        fail_on: HashSet<usize>,
        writes: usize,
    }

    #[async_trait]
    impl SweepStore for FlakyStore {
        async fn write_sweep(&mut self, _id: &RecordId, _sweep: &Sweep) -> AppResult<()> {
            let n = self.writes;
            self.writes += 1;
            if self.fail_on.contains(&n) {
                return Err(DaqError::Persistence(format!("disk full on write {n}")));
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, 14, 30, 0)
            .single()
            .unwrap()
    }

    fn sweep_with_min(offset_s: i64, freq: f64, mag: f64) -> Sweep {
        Sweep::new(
            t0() + ChronoDuration::seconds(offset_s),
            vec![freq - 1.0, freq, freq + 1.0],
            vec![mag + 3.0, mag, mag + 3.0],
        )
        .unwrap()
    }

    fn recorder(
        dir: &TempDir,
        store: Box<dyn SweepStore>,
    ) -> (Recorder, HandoffSender<Sweep>, StopSignal) {
        let (tx, rx) = handoff();
        let stop = StopSignal::new();
        let ledger = SummaryLedger::open(dir.path().join("summary.csv")).unwrap();
        let recorder = Recorder::new(store, ledger, rx, stop.clone(), Duration::from_millis(20));
        (recorder, tx, stop)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_record_writes_raw_and_summary() {
        let dir = TempDir::new().unwrap();
        let store = CsvSweepStore::new(dir.path()).unwrap();
        let (mut recorder, _tx, _stop) = recorder(&dir, Box::new(store));

        let outcome = recorder.record(sweep_with_min(0, 100.0, -1.0)).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.id.as_str(), "20240501_143000_100Hz");
        assert!(dir.path().join("20240501_143000_100Hz.csv").exists());

        let summary = outcome.summary.unwrap();
        assert_eq!(summary.sequence, 1);
        assert!(logs_contain(
            "[2024-05-01 14:30:00] read #1: minimum -1.00 dB at 100.00 Hz, saved 20240501_143000_100Hz"
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_raw_failure_does_not_block_later_sweeps() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore {
            fail_on: HashSet::from([0]),
            writes: 0,
        };
        let (mut recorder, _tx, _stop) = recorder(&dir, Box::new(store));

        let first = recorder.record(sweep_with_min(0, 100.0, -1.0)).await;
        assert!(first.raw.is_err());
        assert_eq!(first.summary.as_ref().unwrap().sequence, 1);
        assert!(!first.is_complete());

        let second = recorder.record(sweep_with_min(1, 101.0, -2.0)).await;
        assert!(second.is_complete());
        assert_eq!(second.summary.unwrap().sequence, 2);
        assert!(logs_contain("Failed to persist sweep"));
        assert!(logs_contain("stage=\"raw\""));
    }

    #[tokio::test]
    async fn test_run_drains_queue_after_stop() {
        let dir = TempDir::new().unwrap();
        let store = CsvSweepStore::new(dir.path()).unwrap();
        let (recorder, tx, stop) = recorder(&dir, Box::new(store));

        for i in 0..5 {
            tx.enqueue(sweep_with_min(i, 100.0 + i as f64, -1.0));
        }
        stop.request_stop();
        drop(tx);

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), recorder.run())
            .await
            .expect("recorder drained and exited");
        assert_eq!(report.sweeps_dequeued, 5);
        assert_eq!(report.sweeps_recorded, 5);
        assert_eq!(report.persistence_failures(), 0);

        let summary = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        let counts: Vec<&str> = summary
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(counts, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_run_waits_for_live_producer() {
        let dir = TempDir::new().unwrap();
        let store = CsvSweepStore::new(dir.path()).unwrap();
        let (recorder, tx, stop) = recorder(&dir, Box::new(store));

        stop.request_stop();
        let task = tokio::spawn(recorder.run());

        // A producer finishing its in-flight poll after the stop
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(!task.is_finished());
        tx.enqueue(sweep_with_min(0, 100.0, -1.0));
        drop(tx);

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("recorder exited")
            .unwrap();
        assert_eq!(report.sweeps_recorded, 1);
    }
}
