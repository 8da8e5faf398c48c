//! Tests for graceful shutdown with timeout behavior.

use std::time::{Duration, Instant};
use sweep_daq::{
    data::{CsvSweepStore, SummaryLedger},
    instrument::{mock::MockProbe, MockAnalyzer},
    pipeline::{Orchestrator, OrchestratorState, RunReport, StopSignal},
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Helper to start a pipeline against a mock analyzer.
fn start_pipeline(
    dir: &TempDir,
    analyzer: MockAnalyzer,
    interval: Duration,
) -> (JoinHandle<RunReport>, StopSignal, MockProbe) {
    let probe = analyzer.probe();
    let store = CsvSweepStore::new(dir.path()).expect("Failed to create store");
    let ledger =
        SummaryLedger::open(dir.path().join("summary.csv")).expect("Failed to open ledger");
    let orchestrator = Orchestrator::with_timing(interval, Duration::from_millis(100));
    let stop = orchestrator.stop_signal();
    let handle = tokio::spawn(orchestrator.run(Box::new(analyzer), Box::new(store), ledger));
    (handle, stop, probe)
}

async fn wait_for_first_poll(probe: &MockProbe) {
    while probe.reads() < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_shutdown_is_graceful() {
    let dir = TempDir::new().unwrap();
    let (handle, stop, probe) = start_pipeline(
        &dir,
        MockAnalyzer::new().with_points(51),
        Duration::from_millis(50),
    );
    wait_for_first_poll(&probe).await;

    let start = Instant::now();
    stop.request_stop();
    let report = handle.await.unwrap();
    let elapsed = start.elapsed();

    // Bounded by one dequeue timeout plus a sweep, far below the poll interval
    assert!(
        elapsed < Duration::from_secs(2),
        "Graceful shutdown took too long: {:?}",
        elapsed
    );
    assert_eq!(report.final_state, OrchestratorState::Closed);
    assert!(report.instrument_closed);
    assert!(probe.closed());
}

#[tokio::test]
async fn test_stop_does_not_wait_out_poll_interval() {
    let dir = TempDir::new().unwrap();
    let (handle, stop, probe) = start_pipeline(
        &dir,
        MockAnalyzer::new().with_points(11),
        Duration::from_secs(3600),
    );
    wait_for_first_poll(&probe).await;

    stop.request_stop();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Shutdown waited for the poll interval")
        .unwrap();

    assert_eq!(report.acquisition.polls, 1);
    assert_eq!(probe.triggers(), 1);
}

#[tokio::test]
async fn test_repeated_stop_requests_are_ignored() {
    let dir = TempDir::new().unwrap();
    let (handle, stop, probe) = start_pipeline(
        &dir,
        MockAnalyzer::new().with_points(11),
        Duration::from_millis(20),
    );
    wait_for_first_poll(&probe).await;

    assert!(stop.request_stop());
    assert!(!stop.request_stop());
    assert!(!stop.request_stop());

    let report = handle.await.unwrap();
    assert_eq!(report.final_state, OrchestratorState::Closed);
    assert!(!report.worker_fault);
}

#[tokio::test]
async fn test_close_failure_still_completes_shutdown() {
    let dir = TempDir::new().unwrap();
    let (handle, stop, probe) = start_pipeline(
        &dir,
        MockAnalyzer::new().with_points(11).fail_close(),
        Duration::from_millis(20),
    );
    wait_for_first_poll(&probe).await;

    stop.request_stop();
    let report = handle.await.unwrap();

    assert!(probe.closed());
    assert!(!report.instrument_closed);
    assert_eq!(report.final_state, OrchestratorState::Closed);
    assert_eq!(report.undrained, 0);
    assert_eq!(
        report.recording.sweeps_recorded,
        report.acquisition.sweeps_acquired
    );
}
