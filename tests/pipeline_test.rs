//! End-to-end tests of the acquisition pipeline against the mock analyzer.

use std::path::Path;
use std::time::Duration;
use sweep_daq::{
    data::{ledger::SUMMARY_HEADER, CsvSweepStore, SummaryLedger},
    instrument::{mock::MockProbe, MockAnalyzer},
    pipeline::{Orchestrator, OrchestratorState, RunReport},
};
use tempfile::TempDir;

/// Runs the pipeline until the mock has been triggered `polls` times, then stops it.
async fn run_for_polls(dir: &Path, analyzer: MockAnalyzer, polls: usize) -> (RunReport, MockProbe) {
    let probe = analyzer.probe();
    let store = CsvSweepStore::new(dir).expect("output dir");
    let ledger = SummaryLedger::open(dir.join("summary.csv")).expect("summary log");
    let orchestrator =
        Orchestrator::with_timing(Duration::from_millis(10), Duration::from_millis(50));
    let stop = orchestrator.stop_signal();

    let run = tokio::spawn(orchestrator.run(Box::new(analyzer), Box::new(store), ledger));
    while probe.triggers() < polls {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    stop.request_stop();

    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("pipeline shut down")
        .expect("orchestrator task");
    (report, probe)
}

fn summary_rows(dir: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(dir.join("summary.csv")).expect("summary readable");
    let headers = reader.headers().expect("header row").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), SUMMARY_HEADER);
    reader
        .records()
        .map(|r| r.expect("summary row").iter().map(str::to_string).collect())
        .collect()
}

/// Reconstructs the raw record identifier from a summary row.
fn record_id(row: &[String]) -> String {
    let stamp = row[0].replace('-', "").replace(':', "").replace(' ', "_");
    let frequency: f64 = row[3].parse().expect("frequency column");
    format!("{stamp}_{}Hz", frequency.round() as i64)
}

#[tokio::test]
async fn test_every_acquired_sweep_is_recorded() {
    let dir = TempDir::new().unwrap();
    let (report, probe) = run_for_polls(dir.path(), MockAnalyzer::new().with_points(51), 5).await;

    assert_eq!(report.final_state, OrchestratorState::Closed);
    assert!(probe.closed());
    assert!(report.acquisition.sweeps_acquired >= 5);
    assert_eq!(
        report.recording.sweeps_dequeued,
        report.acquisition.sweeps_acquired
    );
    assert_eq!(report.recording.persistence_failures(), 0);
    assert_eq!(report.undrained, 0);

    let rows = summary_rows(dir.path());
    assert_eq!(rows.len() as u64, report.acquisition.sweeps_acquired);

    let counts: Vec<u64> = rows.iter().map(|r| r[1].parse().unwrap()).collect();
    let expected: Vec<u64> = (1..=rows.len() as u64).collect();
    assert_eq!(counts, expected);

    // First read is the baseline
    assert_eq!(rows[0][4], "0.00");
    assert_eq!(rows[0][5], "0.00");

    for row in &rows {
        let path = dir.path().join(format!("{}.csv", record_id(row)));
        assert!(path.exists(), "missing raw record {}", path.display());
    }
}

#[tokio::test]
async fn test_failed_polls_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new()
        .with_points(21)
        .fail_trigger_on([1])
        .fail_read_on([3]);
    let (report, _probe) = run_for_polls(dir.path(), analyzer, 6).await;

    assert_eq!(report.acquisition.polls_failed, 2);
    assert_eq!(
        report.acquisition.sweeps_acquired,
        report.acquisition.polls - 2
    );
    assert!(!report.worker_fault);

    // Read counts stay consecutive across the skipped polls
    let rows = summary_rows(dir.path());
    let counts: Vec<u64> = rows.iter().map(|r| r[1].parse().unwrap()).collect();
    let expected: Vec<u64> = (1..=rows.len() as u64).collect();
    assert_eq!(counts, expected);
}

#[tokio::test]
async fn test_sweep_in_flight_at_stop_is_recorded() {
    let dir = TempDir::new().unwrap();
    let analyzer = MockAnalyzer::new()
        .with_points(11)
        .with_sweep_time(Duration::from_millis(150));
    let probe = analyzer.probe();
    let store = CsvSweepStore::new(dir.path()).unwrap();
    let ledger = SummaryLedger::open(dir.path().join("summary.csv")).unwrap();
    let orchestrator =
        Orchestrator::with_timing(Duration::from_secs(3600), Duration::from_millis(20));
    let stop = orchestrator.stop_signal();

    let run = tokio::spawn(orchestrator.run(Box::new(analyzer), Box::new(store), ledger));
    while probe.triggers() < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    // The first sweep is still being measured
    stop.request_stop();

    let report = run.await.unwrap();
    assert_eq!(report.acquisition.sweeps_acquired, 1);
    assert_eq!(report.recording.sweeps_recorded, 1);
    assert_eq!(summary_rows(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_restart_appends_to_existing_summary() {
    let dir = TempDir::new().unwrap();
    run_for_polls(dir.path(), MockAnalyzer::new().with_points(11), 2).await;
    let first_run = summary_rows(dir.path()).len();

    run_for_polls(dir.path(), MockAnalyzer::new().with_points(11), 2).await;
    let rows = summary_rows(dir.path());
    assert!(rows.len() > first_run);

    // Counting and the baseline restart with each run; the header is not repeated
    assert_eq!(rows[first_run][1], "1");
    assert_eq!(rows[first_run][4], "0.00");
    let text = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
    assert_eq!(text.matches("Timestamp,ReadCount").count(), 1);
}
