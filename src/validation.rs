//! # Response Validation
//!
//! When validation is enabled, every round trip of every sender task is
//! handed to the [`ValidationSink`] as a [`RoundTripResult`], in round-trip
//! order. [`ValidationManager`] queues those results and checks them on a
//! background task so the senders never wait on validators.
//!
//! A result passes when its response is present and every configured
//! [`MessageValidator`] accepts it.

use crate::measurement::ResultValue;
use crate::message::{Message, MessageTemplate};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one round trip
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTripResult {
    /// Template the message came from; `None` for heartbeats
    pub template: Option<MessageTemplate>,
    /// Message actually sent; `None` for heartbeats
    pub sent: Option<Message>,
    /// Reply; `None` when the measured send failed
    pub response: Option<ResultValue>,
}

/// Collects round-trip results; safe to share between tasks
pub trait ValidationSink: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn add_to_result_messages(&self, result: RoundTripResult);
}

/// Decides whether a response is acceptable
pub trait MessageValidator: Send + Sync {
    fn is_valid(&self, original: Option<&Message>, response: &ResultValue) -> bool;
}

/// Regular expression that has to match the whole payload
#[derive(Debug, Clone)]
pub struct PayloadPattern {
    source: String,
    regex: Regex,
}

impl PayloadPattern {
    /// Compile `source` anchored at both ends
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as configured, without anchors
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, payload: &str) -> bool {
        self.regex.is_match(payload)
    }
}

impl PartialEq for PayloadPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PayloadPattern {}

impl Serialize for PayloadPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PayloadPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Checks the response payload after trimming every line and the whole text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadValidator {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Matches(PayloadPattern),
}

fn normalize(payload: &str) -> String {
    payload
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

impl MessageValidator for PayloadValidator {
    fn is_valid(&self, _original: Option<&Message>, response: &ResultValue) -> bool {
        let payload = normalize(&response.as_text());
        let valid = match self {
            PayloadValidator::Equals(expected) => payload == *expected,
            PayloadValidator::Contains(needle) => payload.contains(needle.as_str()),
            PayloadValidator::StartsWith(prefix) => payload.starts_with(prefix.as_str()),
            PayloadValidator::EndsWith(suffix) => payload.ends_with(suffix.as_str()),
            PayloadValidator::Matches(pattern) => pattern.is_match(&payload),
        };

        if !valid {
            info!("Message payload '{}' does not satisfy {:?}", payload, self);
        }
        valid
    }
}

/// Pass/fail counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    passed: AtomicU64,
    failed: AtomicU64,
}

struct Checker {
    validators: Vec<Arc<dyn MessageValidator>>,
    counters: Counters,
}

impl Checker {
    fn check(&self, result: &RoundTripResult) {
        let valid = match &result.response {
            Some(response) => self
                .validators
                .iter()
                .all(|v| v.is_valid(result.sent.as_ref(), response)),
            None => {
                debug!("Round trip without response counted as failed");
                false
            }
        };

        if valid {
            self.counters.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn drain(&self, receiver: &mut UnboundedReceiver<RoundTripResult>) {
        while let Ok(result) = receiver.try_recv() {
            self.check(&result);
        }
    }
}

/// Bundled validation sink with a background checker
pub struct ValidationManager {
    enabled: bool,
    checker: Arc<Checker>,
    sender: Mutex<Option<UnboundedSender<RoundTripResult>>>,
    receiver: Mutex<Option<UnboundedReceiver<RoundTripResult>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ValidationManager {
    pub fn new(enabled: bool, validators: Vec<Arc<dyn MessageValidator>>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            enabled,
            checker: Arc::new(Checker {
                validators,
                counters: Counters::default(),
            }),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    /// Validation switched off; tasks make no calls into it
    pub fn disabled() -> Self {
        Self::new(false, Vec::new())
    }

    /// Start checking queued results on a background task.
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let checker = self.checker.clone();
        let handle = tokio::spawn(async move {
            while let Some(result) = receiver.recv().await {
                checker.check(&result);
            }
            debug!("Validation queue closed");
        });
        *self.worker.lock() = Some(handle);
    }

    /// Stop accepting results, check everything queued and return the counts
    pub async fn finish(&self) -> ValidationSummary {
        drop(self.sender.lock().take());

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("Validation worker failed: {}", e);
            }
        }

        // Never started; check inline.
        let pending = self.receiver.lock().take();
        if let Some(mut receiver) = pending {
            self.checker.drain(&mut receiver);
        }

        let summary = self.summary();
        if self.enabled {
            info!(
                "Validation finished: {} passed, {} failed",
                summary.passed, summary.failed
            );
        }
        summary
    }

    /// Counts so far
    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            passed: self.checker.counters.passed.load(Ordering::Relaxed),
            failed: self.checker.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl ValidationSink for ValidationManager {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn add_to_result_messages(&self, result: RoundTripResult) {
        if !self.enabled {
            return;
        }
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(result).is_err() {
                    warn!("Validation worker is gone, result dropped");
                }
            }
            None => warn!("Validation already finished, result dropped"),
        }
    }
}
