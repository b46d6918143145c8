//! # Concurrency Gate
//!
//! A counting permit that bounds how many sender tasks may be queued or in
//! flight at once. The producer acquires a [`GatePermit`] before it builds a
//! task and hands the permit to that task; the permit goes back to the gate
//! when it is dropped, which happens exactly once on every exit path of the
//! task, including an unwinding panic.

use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Process-wide backpressure counter
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One outstanding gate permit; released on drop
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` permits
    pub fn new(capacity: usize) -> EngineResult<Self> {
        if capacity == 0 {
            return Err(EngineError::Config(
                "concurrency gate capacity must be greater than 0".to_string(),
            ));
        }
        // drain() takes every permit in one u32-sized request
        if capacity > u32::MAX as usize || capacity > Semaphore::MAX_PERMITS {
            return Err(EngineError::Config(format!(
                "concurrency gate capacity {} is too large",
                capacity
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a free permit
    pub async fn acquire(&self) -> EngineResult<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Take a permit only if one is immediately free
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held by producers or tasks
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait until every permit has been returned.
    ///
    /// All permits are taken at once and handed straight back, so the gate is
    /// usable again afterwards.
    pub async fn drain(&self) -> EngineResult<()> {
        debug!("Draining concurrency gate ({} in flight)", self.in_flight());
        let all = self
            .semaphore
            .acquire_many(self.capacity as u32)
            .await
            .map_err(|_| EngineError::GateClosed)?;
        drop(all);
        Ok(())
    }
}
