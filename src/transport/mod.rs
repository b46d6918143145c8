//! # Transports
//!
//! A [`Transport`] is one stateful session to the system under test. Every
//! round trip drives it through three phases: an unmeasured
//! [`Transport::pre_send`], the measured [`Transport::send`] and an
//! unmeasured [`Transport::post_send`]. Transports are created once, kept in
//! a [`crate::pool::TransportPool`] and reused by many sender tasks, one task
//! at a time.
//!
//! Concrete implementations are chosen at configuration time through
//! [`TransportFactory`]:
//!
//! - [`DummyTransport`]: in-process loopback with an optional delay
//! - [`TcpTransport`]: one persistent TCP connection with length-prefixed frames

use crate::cli::TransportKind;
use crate::measurement::{MeasurementUnit, ResultValue};
use crate::message::{Headers, Message};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod dummy;
pub mod tcp;

pub use dummy::DummyTransport;
pub use tcp::TcpTransport;

/// Configuration shared by every transport in a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Target address, e.g. `127.0.0.1:8080` for TCP
    pub target: String,
    pub connect_timeout: Duration,
    /// Upper bound for one write or one read on the wire
    pub io_timeout: Duration,
    /// Initial capacity of the TCP request buffer
    pub buffer_size: usize,
    /// Artificial service time of the dummy transport
    pub delay: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Dummy,
            target: crate::defaults::TARGET.to_string(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            buffer_size: 8192,
            delay: None,
        }
    }
}

/// Session to a target with a pre/measured/post lifecycle.
///
/// `message` is `None` for heartbeat iterations, where the message store is
/// empty and one exchange without payload is performed. Every method may
/// fail; the caller decides which failures matter.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the session; called once when the pool is built
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()>;

    /// Unmeasured preparation before the measured send
    async fn pre_send(&mut self, _message: Option<&Message>, _headers: &Headers) -> Result<()> {
        Ok(())
    }

    /// The measured exchange.
    ///
    /// `unit` is the iteration's measurement unit; implementations may store
    /// extra named results on it.
    async fn send(
        &mut self,
        message: Option<&Message>,
        headers: &Headers,
        unit: &mut MeasurementUnit,
    ) -> Result<Option<ResultValue>>;

    /// Unmeasured cleanup after the measured send
    async fn post_send(&mut self, _message: Option<&Message>) -> Result<()> {
        Ok(())
    }

    /// Close the session; called once when the pool is torn down
    async fn close(&mut self) -> Result<()>;

    /// Transport name for logs
    fn name(&self) -> &'static str;
}

/// Builds transports for the configured kind
pub struct TransportFactory;

impl TransportFactory {
    /// Create a new, uninitialized transport
    pub fn create(kind: TransportKind) -> Box<dyn Transport> {
        match kind {
            TransportKind::Dummy => Box::new(DummyTransport::new()),
            TransportKind::Tcp => Box::new(TcpTransport::new()),
        }
    }
}
