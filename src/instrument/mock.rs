//! A mock network analyzer that generates synthetic resonance sweeps.
//!
//! Each sweep is a Lorentzian notch over a fixed span whose centre drifts by a
//! constant step per trigger, plus a little uniform noise. Faults can be
//! scripted per poll so the pipeline's error isolation can be exercised without
//! hardware.
use crate::{
    core::Instrument,
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Observable counters shared with whoever built the mock.
///
/// The analyzer itself moves into the acquirer, so tests keep a clone of this
/// handle to see what happened to it.
#[derive(Clone, Debug, Default)]
pub struct MockProbe {
    triggers: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MockProbe {
    /// Number of trigger calls so far (successful or failed).
    pub fn triggers(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    /// Number of successful reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Synthetic analyzer producing a drifting resonance notch.
pub struct MockAnalyzer {
    points: usize,
    start_hz: f64,
    stop_hz: f64,
    centre_hz: f64,
    drift_hz: f64,
    depth_db: f64,
    width_hz: f64,
    noise_db: f64,
    sweep_time: Duration,
    fail_trigger_on: HashSet<usize>,
    fail_read_on: HashSet<usize>,
    fail_close: bool,
    sweep_cap: Option<usize>,
    poll: usize,
    probe: MockProbe,
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnalyzer {
    /// 201 points from 1.0 to 1.1 GHz with a 20 dB notch drifting 5 kHz per sweep.
    pub fn new() -> Self {
        Self {
            points: 201,
            start_hz: 1.0e9,
            stop_hz: 1.1e9,
            centre_hz: 1.05e9,
            drift_hz: 5.0e3,
            depth_db: 20.0,
            width_hz: 2.0e6,
            noise_db: 0.05,
            sweep_time: Duration::ZERO,
            fail_trigger_on: HashSet::new(),
            fail_read_on: HashSet::new(),
            fail_close: false,
            sweep_cap: None,
            poll: 0,
            probe: MockProbe::default(),
        }
    }

    /// Sets the number of points per sweep (at least one).
    pub fn with_points(mut self, points: usize) -> Self {
        self.points = points.max(1);
        self
    }

    /// Disables the random noise so that minima are exactly predictable.
    pub fn without_noise(mut self) -> Self {
        self.noise_db = 0.0;
        self
    }

    /// Simulated time for a sweep to complete.
    pub fn with_sweep_time(mut self, sweep_time: Duration) -> Self {
        self.sweep_time = sweep_time;
        self
    }

    /// Makes the trigger fail on the given zero-based poll indices.
    pub fn fail_trigger_on(mut self, polls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_trigger_on.extend(polls);
        self
    }

    /// Makes the read-back fail on the given zero-based poll indices.
    pub fn fail_read_on(mut self, polls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_read_on.extend(polls);
        self
    }

    /// Fails every trigger once `cap` polls have been made.
    pub fn with_sweep_cap(mut self, cap: usize) -> Self {
        self.sweep_cap = Some(cap);
        self
    }

    /// Makes `close` report an error.
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Handle for observing the analyzer after it has been moved into the pipeline.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    /// Frequency at which the notch of the given poll sits.
    pub fn centre_for_poll(&self, poll: usize) -> f64 {
        self.centre_hz + self.drift_hz * poll as f64
    }

    fn frequencies(&self) -> Vec<f64> {
        if self.points == 1 {
            return vec![self.start_hz];
        }
        let step = (self.stop_hz - self.start_hz) / (self.points - 1) as f64;
        (0..self.points)
            .map(|i| self.start_hz + step * i as f64)
            .collect()
    }
}

#[async_trait]
impl Instrument for MockAnalyzer {
    fn name(&self) -> String {
        "Mock Network Analyzer".to_string()
    }

    async fn trigger_and_wait_sweep(&mut self) -> AppResult<()> {
        let poll = self.probe.triggers.fetch_add(1, Ordering::SeqCst);
        self.poll = poll;
        if self.sweep_cap.is_some_and(|cap| poll >= cap) {
            return Err(DaqError::Instrument(format!(
                "mock sweep cap reached on poll {poll}"
            )));
        }
        if self.fail_trigger_on.contains(&poll) {
            return Err(DaqError::Instrument(format!(
                "mock trigger failure on poll {poll}"
            )));
        }
        if !self.sweep_time.is_zero() {
            tokio::time::sleep(self.sweep_time).await;
        }
        debug!(poll, "Mock sweep complete");
        Ok(())
    }

    async fn read_sweep(&mut self) -> AppResult<(Vec<f64>, Vec<f64>)> {
        if self.fail_read_on.contains(&self.poll) {
            return Err(DaqError::Instrument(format!(
                "mock read failure on poll {}",
                self.poll
            )));
        }

        let centre = self.centre_for_poll(self.poll);
        let half_width = self.width_hz / 2.0;
        let frequencies = self.frequencies();
        let mut rng = rand::thread_rng();
        let magnitudes = frequencies
            .iter()
            .map(|&f| {
                let detuning = (f - centre) / half_width;
                let notch = -self.depth_db / (1.0 + detuning * detuning);
                let noise = if self.noise_db > 0.0 {
                    rng.gen_range(-self.noise_db..self.noise_db)
                } else {
                    0.0
                };
                notch + noise
            })
            .collect();

        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        Ok((frequencies, magnitudes))
    }

    async fn close(&mut self) -> AppResult<()> {
        info!("Closing Mock Network Analyzer.");
        self.probe.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(DaqError::Instrument("mock close failure".to_string()));
        }
        Ok(())
    }
}
