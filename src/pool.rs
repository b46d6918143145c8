//! # Transport Pool
//!
//! A fixed-size set of identically configured transports, built and
//! initialized up front and shared by every sender task of a run.
//!
//! [`TransportPool::acquire`] waits until a transport is idle and hands it out
//! as a [`PooledTransport`]. The handle gives exclusive use of the transport
//! and goes back to the pool exactly once: either through
//! [`TransportPool::release`] or, if the holder bails out early, when the
//! handle is dropped.
//!
//! ## Contract Violations
//!
//! Releasing a handle into a pool that did not issue it logs a warning and
//! leaves this pool untouched; the handle then returns to its own pool. A
//! transport returned while it is not checked out is logged and ignored.
//! Neither case affects other holders.

use crate::error::{EngineError, EngineResult};
use crate::transport::{Transport, TransportConfig, TransportFactory};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A transport plus its position in the pool
struct Slot {
    id: usize,
    transport: Box<dyn Transport>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Slot>,
    checked_out: HashSet<usize>,
}

struct PoolInner {
    pool_id: Uuid,
    capacity: usize,
    state: Mutex<PoolState>,
    permits: Arc<Semaphore>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl PoolInner {
    /// Put a slot back into the idle set, then free its permit
    fn give_back(&self, slot: Slot, permit: Option<OwnedSemaphorePermit>) {
        {
            let mut state = self.state.lock();
            if !state.checked_out.remove(&slot.id) {
                warn!(
                    "Pool {}: transport {} returned while not checked out, ignoring",
                    self.pool_id, slot.id
                );
                return;
            }
            state.idle.push(slot);
        }
        self.released.fetch_add(1, Ordering::Relaxed);
        // Permit goes last so a waiter always finds an idle slot.
        drop(permit);
    }
}

/// Bounded pool of initialized transports
#[derive(Clone)]
pub struct TransportPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool")
            .field("pool_id", &self.inner.pool_id)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl TransportPool {
    /// Build `size` transports of the configured kind and initialize them
    pub async fn build(config: &TransportConfig, size: usize) -> EngineResult<Self> {
        let kind = config.kind;
        Self::build_with(config, size, move || TransportFactory::create(kind)).await
    }

    /// Build `size` transports from `factory` and initialize them.
    ///
    /// The first initialization failure closes the transports created so far
    /// and fails the whole build.
    pub async fn build_with<F>(config: &TransportConfig, size: usize, factory: F) -> EngineResult<Self>
    where
        F: Fn() -> Box<dyn Transport>,
    {
        if size == 0 {
            return Err(EngineError::Config(
                "transport pool size must be greater than 0".to_string(),
            ));
        }
        if size > u32::MAX as usize || size > Semaphore::MAX_PERMITS {
            return Err(EngineError::Config(format!(
                "transport pool size {} is too large",
                size
            )));
        }

        let pool_id = Uuid::new_v4();
        let mut idle: Vec<Slot> = Vec::with_capacity(size);

        for id in 0..size {
            let mut transport = factory();
            if let Err(source) = transport.initialize(config).await {
                error!(
                    "Pool {}: transport {} of {} failed to initialize: {:#}",
                    pool_id, id, size, source
                );
                close_all(pool_id, idle).await;
                return Err(EngineError::PoolInit {
                    index: id,
                    size,
                    source,
                });
            }
            idle.push(Slot { id, transport });
        }
        // Pop order hands out transport 0 first.
        idle.reverse();

        info!(
            "Pool {}: {} {} transport(s) ready for {}",
            pool_id,
            size,
            idle.first().map(|s| s.transport.name()).unwrap_or("unknown"),
            config.target
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                pool_id,
                capacity: size,
                state: Mutex::new(PoolState {
                    idle,
                    checked_out: HashSet::new(),
                }),
                permits: Arc::new(Semaphore::new(size)),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        })
    }

    /// Wait for an idle transport and take exclusive use of it
    pub async fn acquire(&self) -> EngineResult<PooledTransport> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;

        let slot = {
            let mut state = self.inner.state.lock();
            let slot = state.idle.pop().ok_or_else(|| {
                EngineError::Config(format!(
                    "pool {} granted a permit with no idle transport",
                    self.inner.pool_id
                ))
            })?;
            state.checked_out.insert(slot.id);
            slot
        };
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledTransport {
            pool: self.inner.clone(),
            slot: Some(slot),
            permit: Some(permit),
        })
    }

    /// Return a transport to the pool
    pub fn release(&self, mut handle: PooledTransport) {
        if !Arc::ptr_eq(&self.inner, &handle.pool) {
            warn!(
                "Pool {}: refusing transport issued by pool {}",
                self.inner.pool_id, handle.pool.pool_id
            );
            // Dropping the handle sends it home.
            return;
        }

        if let Some(slot) = handle.slot.take() {
            self.inner.give_back(slot, handle.permit.take());
        }
    }

    /// Wait for every transport to come back, then close them all.
    ///
    /// Close failures are logged and do not stop the remaining transports
    /// from closing. The pool refuses new acquisitions afterwards.
    pub async fn close(&self) {
        let inner = &self.inner;
        match inner.permits.acquire_many(inner.capacity as u32).await {
            Ok(all) => {
                inner.permits.close();
                drop(all);
            }
            Err(_) => {
                debug!("Pool {} already closed", inner.pool_id);
                return;
            }
        }

        let idle = std::mem::take(&mut inner.state.lock().idle);
        close_all(inner.pool_id, idle).await;
        info!("Pool {} closed", inner.pool_id);
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Transports currently idle
    pub fn available(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Total successful acquisitions so far
    pub fn acquired_total(&self) -> u64 {
        self.inner.acquired.load(Ordering::Relaxed)
    }

    /// Total returns so far, explicit or on drop
    pub fn released_total(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }
}

async fn close_all(pool_id: Uuid, slots: Vec<Slot>) {
    for mut slot in slots {
        if let Err(e) = slot.transport.close().await {
            warn!(
                "Pool {}: transport {} failed to close: {:#}",
                pool_id, slot.id, e
            );
        }
    }
}

/// Exclusive handle on one pooled transport.
///
/// Dereferences to the transport. Returns to its pool when released or
/// dropped, whichever comes first.
pub struct PooledTransport {
    pool: Arc<PoolInner>,
    slot: Option<Slot>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledTransport {
    /// Position of the transport within its pool
    pub fn id(&self) -> Option<usize> {
        self.slot.as_ref().map(|s| s.id)
    }
}

impl Deref for PooledTransport {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        self.slot
            .as_ref()
            .map(|s| s.transport.as_ref())
            .expect("pooled transport is only emptied on release or drop")
    }
}

impl DerefMut for PooledTransport {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot
            .as_mut()
            .map(|s| s.transport.as_mut())
            .expect("pooled transport is only emptied on release or drop")
    }
}

impl Drop for PooledTransport {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            debug!(
                "Pool {}: transport {} returned on drop",
                self.pool.pool_id, slot.id
            );
            self.pool.give_back(slot, self.permit.take());
        }
    }
}
