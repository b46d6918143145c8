//! # Measurement Units
//!
//! A [`MeasurementUnit`] is the timed record of one generator iteration. It is
//! issued by the report sink with a fresh iteration number, filled in by
//! exactly one sender task and handed back once.
//!
//! ## Timing Policy
//!
//! An iteration may perform several round trips. Each round trip opens the
//! timing window with [`MeasurementUnit::start_measure`] and closes it with
//! [`MeasurementUnit::stop_measure`]; the closed interval is **added** to
//! [`MeasurementUnit::total_time`] and also kept as
//! [`MeasurementUnit::last_time`]. The reported latency of an iteration is
//! therefore the sum of its measured phases and never includes the
//! unmeasured pre/post phases or the gaps between round trips.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Name of the result slot the sender task writes into
pub const DEFAULT_RESULT: &str = "Result";

/// Opaque value stored in a result slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Bytes(Vec<u8>),
    Text(String),
    Number(f64),
}

impl ResultValue {
    /// Best-effort textual view, used by validators
    pub fn as_text(&self) -> String {
        match self {
            ResultValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ResultValue::Text(text) => text.clone(),
            ResultValue::Number(n) => n.to_string(),
        }
    }
}

impl From<String> for ResultValue {
    fn from(value: String) -> Self {
        ResultValue::Text(value)
    }
}

impl From<&str> for ResultValue {
    fn from(value: &str) -> Self {
        ResultValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for ResultValue {
    fn from(value: Vec<u8>) -> Self {
        ResultValue::Bytes(value)
    }
}

/// One timed iteration
#[derive(Debug, Clone)]
pub struct MeasurementUnit {
    iteration: u64,
    start: Option<Instant>,
    stop: Option<Instant>,
    total: Duration,
    last: Duration,
    measurements: u64,
    results: BTreeMap<String, Option<ResultValue>>,
}

impl MeasurementUnit {
    /// Create an empty unit; report sinks own iteration numbering
    pub fn new(iteration: u64) -> Self {
        Self {
            iteration,
            start: None,
            stop: None,
            total: Duration::ZERO,
            last: Duration::ZERO,
            measurements: 0,
            results: BTreeMap::new(),
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Open the timing window
    pub fn start_measure(&mut self) {
        self.start = Some(Instant::now());
        self.stop = None;
    }

    /// Close the timing window and add the interval to the total.
    ///
    /// Calling this without an open window does nothing.
    pub fn stop_measure(&mut self) {
        let Some(start) = self.start else {
            return;
        };
        if self.stop.is_some() {
            return;
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(start);
        self.stop = Some(now);
        self.last = elapsed;
        self.total += elapsed;
        self.measurements += 1;
    }

    /// Sum of all closed timing windows
    pub fn total_time(&self) -> Duration {
        self.total
    }

    /// Duration of the most recently closed window
    pub fn last_time(&self) -> Duration {
        self.last
    }

    /// Number of closed timing windows
    pub fn measurements(&self) -> u64 {
        self.measurements
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start
    }

    pub fn stop_time(&self) -> Option<Instant> {
        self.stop
    }

    /// Store a result under `name`, replacing any earlier value
    pub fn append_result(&mut self, name: impl Into<String>, value: Option<ResultValue>) {
        self.results.insert(name.into(), value);
    }

    pub fn result(&self, name: &str) -> Option<&ResultValue> {
        self.results.get(name).and_then(Option::as_ref)
    }

    pub fn results(&self) -> &BTreeMap<String, Option<ResultValue>> {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_durations_accumulate_across_windows() {
        let mut unit = MeasurementUnit::new(1);

        unit.start_measure();
        sleep(Duration::from_millis(5));
        unit.stop_measure();
        let first = unit.last_time();

        unit.start_measure();
        sleep(Duration::from_millis(5));
        unit.stop_measure();
        let second = unit.last_time();

        assert_eq!(unit.measurements(), 2);
        assert_eq!(unit.total_time(), first + second);
        assert!(unit.total_time() >= Duration::from_millis(10));
    }

    #[test]
    fn test_stop_is_never_before_start() {
        let mut unit = MeasurementUnit::new(3);
        unit.start_measure();
        unit.stop_measure();
        assert!(unit.stop_time().unwrap() >= unit.start_time().unwrap());
    }

    #[test]
    fn test_stop_without_start_is_ignored() {
        let mut unit = MeasurementUnit::new(1);
        unit.stop_measure();
        assert_eq!(unit.measurements(), 0);
        assert_eq!(unit.total_time(), Duration::ZERO);
    }

    #[test]
    fn test_double_stop_counts_once() {
        let mut unit = MeasurementUnit::new(1);
        unit.start_measure();
        unit.stop_measure();
        let total = unit.total_time();
        unit.stop_measure();
        assert_eq!(unit.measurements(), 1);
        assert_eq!(unit.total_time(), total);
    }

    #[test]
    fn test_result_slot_is_overwritten() {
        let mut unit = MeasurementUnit::new(9);
        unit.append_result(DEFAULT_RESULT, Some("first".into()));
        unit.append_result(DEFAULT_RESULT, Some("second".into()));
        assert_eq!(unit.results().len(), 1);
        assert_eq!(
            unit.result(DEFAULT_RESULT),
            Some(&ResultValue::Text("second".to_string()))
        );

        unit.append_result(DEFAULT_RESULT, None);
        assert!(unit.result(DEFAULT_RESULT).is_none());
    }
}
