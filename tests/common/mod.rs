//! Recording fakes shared by the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use loadgen_engine::measurement::{MeasurementUnit, ResultValue};
use loadgen_engine::message::{Headers, Message};
use loadgen_engine::report::ReportSink;
use loadgen_engine::transport::{Transport, TransportConfig};
use loadgen_engine::validation::{RoundTripResult, ValidationSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which lifecycle phase a recorded call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Send,
    Post,
}

/// One transport call as seen by the fake
#[derive(Debug, Clone)]
pub struct Call {
    pub transport: usize,
    pub phase: Phase,
    pub iteration: Option<u64>,
    pub payload: Option<String>,
    pub headers: Headers,
}

/// Shared log of everything the fake transports did
#[derive(Default)]
pub struct TransportLog {
    pub calls: Mutex<Vec<Call>>,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
}

impl TransportLog {
    pub fn sends(&self) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.phase == Phase::Send)
            .cloned()
            .collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// How the fake transport behaves
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    pub delay: Option<Duration>,
    pub fail_pre: bool,
    pub fail_send: bool,
    pub fail_post: bool,
    pub panic_send: bool,
}

/// Transport that echoes payloads and records every call
pub struct RecordingTransport {
    id: usize,
    log: Arc<TransportLog>,
    behavior: Behavior,
}

impl RecordingTransport {
    pub fn factory(log: Arc<TransportLog>, behavior: Behavior) -> impl Fn() -> Box<dyn Transport> {
        move || {
            let id = log.created.fetch_add(1, Ordering::SeqCst);
            Box::new(RecordingTransport {
                id,
                log: log.clone(),
                behavior,
            }) as Box<dyn Transport>
        }
    }

    fn record(
        &self,
        phase: Phase,
        iteration: Option<u64>,
        message: Option<&Message>,
        headers: &Headers,
    ) {
        self.log.calls.lock().push(Call {
            transport: self.id,
            phase,
            iteration,
            payload: message.map(|m| m.payload.clone()),
            headers: headers.clone(),
        });
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn initialize(&mut self, _config: &TransportConfig) -> Result<()> {
        Ok(())
    }

    async fn pre_send(&mut self, message: Option<&Message>, headers: &Headers) -> Result<()> {
        self.record(Phase::Pre, None, message, headers);
        if self.behavior.fail_pre {
            return Err(anyhow!("pre-send refused"));
        }
        Ok(())
    }

    async fn send(
        &mut self,
        message: Option<&Message>,
        headers: &Headers,
        unit: &mut MeasurementUnit,
    ) -> Result<Option<ResultValue>> {
        let active = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(active, Ordering::SeqCst);
        self.record(Phase::Send, Some(unit.iteration()), message, headers);

        if let Some(delay) = self.behavior.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.active.fetch_sub(1, Ordering::SeqCst);

        if self.behavior.panic_send {
            panic!("transport blew up");
        }
        if self.behavior.fail_send {
            return Err(anyhow!("send refused"));
        }
        Ok(Some(ResultValue::Text(
            message.map(|m| m.payload.clone()).unwrap_or_default(),
        )))
    }

    async fn post_send(&mut self, message: Option<&Message>) -> Result<()> {
        self.record(Phase::Post, None, message, &Headers::new());
        if self.behavior.fail_post {
            return Err(anyhow!("post-send refused"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Report sink issuing a fixed number of units and keeping what comes back
pub struct RecordingReport {
    limit: u64,
    next: AtomicU64,
    pub requests: AtomicU64,
    pub reported: Mutex<Vec<MeasurementUnit>>,
}

impl RecordingReport {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            next: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            reported: Mutex::new(Vec::new()),
        }
    }

    /// A sink that never issues a unit
    pub fn exhausted() -> Self {
        Self::new(0)
    }

    pub fn reported(&self) -> Vec<MeasurementUnit> {
        self.reported.lock().clone()
    }
}

impl ReportSink for RecordingReport {
    fn new_measurement_unit(&self) -> Option<MeasurementUnit> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
            .map(MeasurementUnit::new)
    }

    fn report(&self, unit: MeasurementUnit) {
        self.reported.lock().push(unit);
    }

    fn is_running(&self) -> bool {
        self.next.load(Ordering::SeqCst) < self.limit
    }
}

/// Validation sink recording every call made into it
pub struct RecordingValidation {
    enabled: bool,
    pub enabled_queries: AtomicUsize,
    pub results: Mutex<Vec<RoundTripResult>>,
}

impl RecordingValidation {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            enabled_queries: AtomicUsize::new(0),
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn results(&self) -> Vec<RoundTripResult> {
        self.results.lock().clone()
    }
}

impl ValidationSink for RecordingValidation {
    fn is_enabled(&self) -> bool {
        self.enabled_queries.fetch_add(1, Ordering::SeqCst);
        self.enabled
    }

    fn add_to_result_messages(&self, result: RoundTripResult) {
        self.results.lock().push(result);
    }
}
