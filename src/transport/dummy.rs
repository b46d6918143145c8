use super::{Transport, TransportConfig};
use crate::measurement::{MeasurementUnit, ResultValue};
use crate::message::{Headers, Message};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Loopback transport that answers with the payload it was given.
///
/// Useful for dry runs of a scenario and for measuring the engine's own
/// overhead. An optional delay simulates service time.
#[derive(Debug, Default)]
pub struct DummyTransport {
    delay: Option<Duration>,
    open: bool,
}

impl DummyTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for DummyTransport {
    async fn initialize(&mut self, config: &TransportConfig) -> Result<()> {
        self.delay = config.delay;
        self.open = true;
        debug!("Dummy transport ready (delay: {:?})", self.delay);
        Ok(())
    }

    async fn send(
        &mut self,
        message: Option<&Message>,
        _headers: &Headers,
        _unit: &mut MeasurementUnit,
    ) -> Result<Option<ResultValue>> {
        if !self.open {
            return Err(anyhow!("Dummy transport is not open"));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        // Heartbeats get an empty reply.
        let reply = message.map(|m| m.payload.clone()).unwrap_or_default();
        Ok(Some(ResultValue::Text(reply)))
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dummy"
    }
}
