use anyhow::Result;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Latency distribution of reported iterations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: f64,
    pub std_dev_ns: f64,
    pub percentiles: Vec<PercentileValue>,
    pub total_samples: u64,
}

/// Percentile value pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ns: u64,
}

/// Iteration and round-trip rates over the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub iterations_per_second: f64,
    pub round_trips_per_second: f64,
    pub total_iterations: u64,
    pub total_round_trips: u64,
    pub duration_ns: u64,
}

/// Latency collector using HDR histogram for accurate measurement
pub struct LatencyCollector {
    histogram: Histogram<u64>,
}

impl LatencyCollector {
    pub fn new() -> Result<Self> {
        // 3 significant figures, auto-resizing
        let histogram = Histogram::<u64>::new(3)?;
        Ok(Self { histogram })
    }

    /// Record one iteration's measured time
    pub fn record(&mut self, latency: Duration) -> Result<()> {
        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.histogram.record(latency_ns)?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Snapshot of the distribution; `None` until something was recorded
    pub fn get_metrics(&self, percentiles: &[f64]) -> Option<LatencyMetrics> {
        if self.histogram.is_empty() {
            return None;
        }

        let percentiles = percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value_ns: self.histogram.value_at_percentile(p),
            })
            .collect();

        Some(LatencyMetrics {
            min_ns: self.histogram.min(),
            max_ns: self.histogram.max(),
            mean_ns: self.histogram.mean(),
            median_ns: self.histogram.value_at_percentile(50.0) as f64,
            std_dev_ns: self.histogram.stdev(),
            percentiles,
            total_samples: self.histogram.len(),
        })
    }

    pub fn reset(&mut self) {
        self.histogram.reset();
    }
}

/// Counts iterations and round trips against wall-clock time
pub struct ThroughputCalculator {
    start_time: Instant,
    iterations: u64,
    round_trips: u64,
}

impl Default for ThroughputCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputCalculator {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            iterations: 0,
            round_trips: 0,
        }
    }

    pub fn record_iteration(&mut self, round_trips: u64) {
        self.iterations += 1;
        self.round_trips += round_trips;
    }

    pub fn get_metrics(&self) -> ThroughputMetrics {
        let elapsed = self.start_time.elapsed();
        let duration_secs = elapsed.as_secs_f64();
        let rate = |count: u64| {
            if duration_secs > 0.0 {
                count as f64 / duration_secs
            } else {
                0.0
            }
        };

        ThroughputMetrics {
            iterations_per_second: rate(self.iterations),
            round_trips_per_second: rate(self.round_trips),
            total_iterations: self.iterations,
            total_round_trips: self.round_trips,
            duration_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.iterations = 0;
        self.round_trips = 0;
    }
}

/// Format latency value for human-readable output
pub fn format_latency(latency_ns: u64) -> String {
    if latency_ns < 1_000 {
        format!("{}ns", latency_ns)
    } else if latency_ns < 1_000_000 {
        format!("{:.2}μs", latency_ns as f64 / 1_000.0)
    } else if latency_ns < 1_000_000_000 {
        format!("{:.2}ms", latency_ns as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", latency_ns as f64 / 1_000_000_000.0)
    }
}
