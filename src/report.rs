//! # Reporting
//!
//! The [`ReportSink`] issues a [`MeasurementUnit`] for every iteration and
//! takes it back once the iteration is done. Declining to issue a unit is the
//! only stop signal the engine knows: a sender task that gets `None` leaves
//! without touching a transport, and the generator stops producing tasks once
//! [`ReportSink::is_running`] turns false.
//!
//! [`ReportManager`] is the bundled sink. It ends the run after a fixed number
//! of iterations, after a wall-clock duration or on [`ReportManager::stop`],
//! and folds every reported unit into an HDR latency histogram.

use crate::measurement::{MeasurementUnit, DEFAULT_RESULT};
use crate::metrics::{LatencyCollector, LatencyMetrics, ThroughputCalculator, ThroughputMetrics};
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Issues and collects measurement units; safe to share between tasks
pub trait ReportSink: Send + Sync {
    /// A fresh unit with a new iteration number, or `None` when the run is over
    fn new_measurement_unit(&self) -> Option<MeasurementUnit>;

    /// Take back a completed unit
    fn report(&self, unit: MeasurementUnit);

    /// Whether new units may still be issued
    fn is_running(&self) -> bool {
        true
    }
}

/// When a run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunLimit {
    /// Issue exactly this many units
    Iterations(u64),
    /// Issue units until this much time has passed since `start`
    Duration(Duration),
    /// Issue units until `stop` is called
    Unbounded,
}

/// Aggregated outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub issued: u64,
    pub reported: u64,
    /// Units whose last round trip produced no result
    pub absent_results: u64,
    pub latency: Option<LatencyMetrics>,
    pub throughput: ThroughputMetrics,
}

struct Collected {
    latency: LatencyCollector,
    throughput: ThroughputCalculator,
}

/// Bundled report sink with iteration, duration or manual stop
pub struct ReportManager {
    limit: RunLimit,
    percentiles: Vec<f64>,
    next_iteration: AtomicU64,
    running: AtomicBool,
    started: Mutex<Option<Instant>>,
    reported: AtomicU64,
    absent_results: AtomicU64,
    collected: Mutex<Collected>,
}

impl ReportManager {
    pub fn new(limit: RunLimit, percentiles: Vec<f64>) -> Result<Self> {
        Ok(Self {
            limit,
            percentiles,
            next_iteration: AtomicU64::new(0),
            running: AtomicBool::new(false),
            started: Mutex::new(None),
            reported: AtomicU64::new(0),
            absent_results: AtomicU64::new(0),
            collected: Mutex::new(Collected {
                latency: LatencyCollector::new()?,
                throughput: ThroughputCalculator::new(),
            }),
        })
    }

    /// Start the clock and begin issuing units
    pub fn start(&self) {
        *self.started.lock() = Some(Instant::now());
        self.collected.lock().throughput.reset();
        self.running.store(true, Ordering::SeqCst);
        info!("Reporting started with limit {:?}", self.limit);
    }

    /// Stop issuing units; units already issued may still be reported
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(
                "Reporting stopped after {} iteration(s)",
                self.next_iteration.load(Ordering::SeqCst)
            );
        }
    }

    pub fn limit(&self) -> RunLimit {
        self.limit
    }

    /// Units handed out so far
    pub fn issued(&self) -> u64 {
        self.next_iteration.load(Ordering::SeqCst)
    }

    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::SeqCst)
    }

    /// Time since `start`
    pub fn elapsed(&self) -> Duration {
        let started = *self.started.lock();
        started.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn summary(&self) -> RunSummary {
        let collected = self.collected.lock();
        RunSummary {
            issued: self.issued(),
            reported: self.reported(),
            absent_results: self.absent_results.load(Ordering::SeqCst),
            latency: collected.latency.get_metrics(&self.percentiles),
            throughput: collected.throughput.get_metrics(),
        }
    }

    /// Claim the next iteration number, honouring an iteration limit
    fn next_iteration(&self) -> Option<u64> {
        match self.limit {
            RunLimit::Iterations(max) => self
                .next_iteration
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .ok(),
            _ => Some(self.next_iteration.fetch_add(1, Ordering::SeqCst)),
        }
    }
}

impl ReportSink for ReportManager {
    fn new_measurement_unit(&self) -> Option<MeasurementUnit> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }

        if let RunLimit::Duration(limit) = self.limit {
            if self.elapsed() >= limit {
                self.stop();
                return None;
            }
        }

        match self.next_iteration() {
            Some(iteration) => Some(MeasurementUnit::new(iteration)),
            None => {
                self.stop();
                None
            }
        }
    }

    fn report(&self, unit: MeasurementUnit) {
        if unit.result(DEFAULT_RESULT).is_none() {
            self.absent_results.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut collected = self.collected.lock();
            if let Err(e) = collected.latency.record(unit.total_time()) {
                warn!("Iteration {}: latency not recorded: {}", unit.iteration(), e);
            }
            collected.throughput.record_iteration(unit.measurements());
        }
        self.reported.fetch_add(1, Ordering::SeqCst);

        debug!(
            "Iteration {} reported: {:?} over {} round trip(s)",
            unit.iteration(),
            unit.total_time(),
            unit.measurements()
        );
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ResultValue;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_nothing_issued_before_start() {
        let manager = ReportManager::new(RunLimit::Unbounded, vec![50.0]).unwrap();
        assert!(manager.new_measurement_unit().is_none());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_iteration_limit() {
        let manager = ReportManager::new(RunLimit::Iterations(3), vec![50.0]).unwrap();
        manager.start();

        let iterations: Vec<u64> = std::iter::from_fn(|| manager.new_measurement_unit())
            .map(|u| u.iteration())
            .collect();
        assert_eq!(iterations, vec![0, 1, 2]);
        assert!(!manager.is_running());
        assert_eq!(manager.issued(), 3);
    }

    #[test]
    fn test_duration_limit() {
        let manager =
            ReportManager::new(RunLimit::Duration(Duration::from_millis(20)), vec![]).unwrap();
        manager.start();
        assert!(manager.new_measurement_unit().is_some());

        std::thread::sleep(Duration::from_millis(30));
        assert!(manager.new_measurement_unit().is_none());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_manual_stop() {
        let manager = ReportManager::new(RunLimit::Unbounded, vec![]).unwrap();
        manager.start();
        assert!(manager.new_measurement_unit().is_some());
        manager.stop();
        assert!(manager.new_measurement_unit().is_none());
    }

    #[test]
    fn test_iterations_are_unique_across_threads() {
        let manager = Arc::new(ReportManager::new(RunLimit::Iterations(1000), vec![]).unwrap());
        manager.start();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(unit) = manager.new_measurement_unit() {
                        seen.push(unit.iteration());
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let seen = handle.join().unwrap();
            // Each thread observes increasing numbers.
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            for n in seen {
                assert!(all.insert(n));
            }
        }
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_report_aggregates_units() {
        let manager = ReportManager::new(RunLimit::Unbounded, vec![50.0, 99.0]).unwrap();
        manager.start();

        let mut ok = manager.new_measurement_unit().unwrap();
        ok.start_measure();
        ok.stop_measure();
        ok.append_result(DEFAULT_RESULT, Some(ResultValue::from("pong")));
        manager.report(ok);

        let mut failed = manager.new_measurement_unit().unwrap();
        failed.start_measure();
        failed.stop_measure();
        failed.append_result(DEFAULT_RESULT, None);
        manager.report(failed);

        let summary = manager.summary();
        assert_eq!(summary.issued, 2);
        assert_eq!(summary.reported, 2);
        assert_eq!(summary.absent_results, 1);
        assert_eq!(summary.throughput.total_round_trips, 2);
        assert_eq!(summary.latency.unwrap().total_samples, 2);
    }
}
