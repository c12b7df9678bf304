// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The in-process Change Bus (spec §4.1).
//!
//! Carries [`ChangePayload`]s from the Store to any number of subscribers
//! with back-pressure and filtering. Per-producer ordering is preserved to
//! each consumer; there is no cross-producer ordering guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

use crate::change::{ChangePayload, EntityType, Operation};

/// Per-consumer delivery deadline (spec §5).
pub const CONSUMER_SEND_DEADLINE: Duration = Duration::from_secs(1);

/// Errors raised by the Change Bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("producer or consumer id already registered: {0}")]
    AlreadyRegistered(String),

    #[error("producer send timed out after {CONSUMER_SEND_DEADLINE:?}")]
    ProducerTimeout,

    #[error("producer is closed")]
    ProducerClosed,

    #[error("bus not initialized")]
    WatcherNotInitialized,
}

/// A predicate over a [`ChangePayload`], composable from primitives.
///
/// Cloning a `Filter` is cheap (it's an `Arc`'d closure); `SetFilter` on a
/// [`Consumer`] replaces the predicate atomically under the bus's registry
/// lock.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&ChangePayload) -> bool + Send + Sync>);

impl Filter {
    pub fn new(f: impl Fn(&ChangePayload) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn matches(&self, payload: &ChangePayload) -> bool {
        (self.0)(payload)
    }

    /// Matches every payload.
    pub fn everything() -> Self {
        Filter::new(|_| true)
    }

    /// Matches no payload.
    pub fn none() -> Self {
        Filter::new(|_| false)
    }

    /// Matches when every sub-filter matches.
    pub fn all(filters: Vec<Filter>) -> Self {
        Filter::new(move |p| filters.iter().all(|f| f.matches(p)))
    }

    /// Matches when any sub-filter matches.
    pub fn any(filters: Vec<Filter>) -> Self {
        Filter::new(move |p| filters.iter().any(|f| f.matches(p)))
    }

    pub fn by_entity_type(types: Vec<EntityType>) -> Self {
        Filter::new(move |p| types.contains(&p.entity_type))
    }

    pub fn exclude_entity_type(types: Vec<EntityType>) -> Self {
        Filter::new(move |p| !types.contains(&p.entity_type))
    }

    pub fn by_operation(ops: Vec<Operation>) -> Self {
        Filter::new(move |p| ops.contains(&p.operation))
    }

    /// Matches payloads whose `id` field equals `id`.
    pub fn by_entity(id: uuid::Uuid) -> Self {
        Filter::new(move |p| p.entity_id() == Some(id))
    }

    pub fn by_credentials(credentials_id: i64) -> Self {
        Filter::new(move |p| p.credentials_id() == Some(credentials_id))
    }

    pub fn by_scale_set(scale_set_id: uuid::Uuid) -> Self {
        Filter::new(move |p| p.scale_set_id() == Some(scale_set_id))
    }

    pub fn by_user_id(user_id: uuid::Uuid) -> Self {
        Filter::new(move |p| p.user_id() == Some(user_id))
    }

    pub fn by_instance_status(statuses: Vec<String>) -> Self {
        Filter::new(move |p| p.instance_status().is_some_and(|s| statuses.contains(&s)))
    }

    /// Wraps an arbitrary caller-supplied predicate.
    pub fn callback(f: impl Fn(&ChangePayload) -> bool + Send + Sync + 'static) -> Self {
        Filter::new(f)
    }
}

struct ConsumerEntry {
    filter: Arc<Mutex<Filter>>,
    tx: mpsc::Sender<ChangePayload>,
}

struct ProducerEntry {
    /// Caps a producer to one in-flight `Notify` at a time (bounded capacity 1).
    inflight: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
}

/// The bus registry: producer and consumer tables guarded by a single mutex.
///
/// Registration and lookup are cheap and infrequent relative to `Notify`
/// fan-out, so a single lock across both tables is adequate — matches the
/// "process-wide maps guarded by a mutex" shape used throughout this
/// codebase for the supporting caches (spec §4.5).
struct Registry {
    producers: HashMap<String, ProducerEntry>,
    consumers: HashMap<String, ConsumerEntry>,
    initialized: bool,
    closed: bool,
}

/// The Change Bus singleton.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Mutex<Registry>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Create a bus. Registration is rejected until this has run — in
    /// practice the bus is constructed once at process start and handed
    /// down, so `WatcherNotInitialized` is primarily reachable in tests that
    /// exercise a bus built with [`Bus::uninitialized`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                producers: HashMap::new(),
                consumers: HashMap::new(),
                initialized: true,
                closed: false,
            })),
        }
    }

    /// A bus that rejects registration until explicitly initialized.
    pub fn uninitialized() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                producers: HashMap::new(),
                consumers: HashMap::new(),
                initialized: false,
                closed: false,
            })),
        }
    }

    pub fn mark_initialized(&self) {
        self.inner.lock().initialized = true;
    }

    pub fn register_producer(&self, id: impl Into<String>) -> Result<Producer, BusError> {
        let id = id.into();
        let mut reg = self.inner.lock();
        if !reg.initialized {
            return Err(BusError::WatcherNotInitialized);
        }
        if reg.producers.contains_key(&id) {
            return Err(BusError::AlreadyRegistered(id));
        }
        let closed = Arc::new(AtomicBool::new(reg.closed));
        let inflight = Arc::new(Semaphore::new(1));
        reg.producers.insert(id.clone(), ProducerEntry { inflight: inflight.clone(), closed: closed.clone() });
        Ok(Producer { id, bus: self.clone(), inflight, closed })
    }

    pub fn register_consumer(&self, id: impl Into<String>, filter: Filter) -> Result<Consumer, BusError> {
        let id = id.into();
        let mut reg = self.inner.lock();
        if !reg.initialized {
            return Err(BusError::WatcherNotInitialized);
        }
        if reg.consumers.contains_key(&id) {
            return Err(BusError::AlreadyRegistered(id));
        }
        // Cold-buffered capacity 1 (spec §4.1).
        let (tx, rx) = mpsc::channel(1);
        let filter = Arc::new(Mutex::new(filter));
        reg.consumers.insert(id.clone(), ConsumerEntry { filter: filter.clone(), tx });
        Ok(Consumer { id, bus: self.clone(), filter, rx })
    }

    /// Idempotent shutdown: drops every consumer sender (unblocking any
    /// pending `Watch` receivers with a closed channel) and marks every
    /// registered producer closed so subsequent `Notify` calls fail fast.
    pub fn close(&self) {
        let mut reg = self.inner.lock();
        if reg.closed {
            return;
        }
        reg.closed = true;
        for p in reg.producers.values() {
            p.closed.store(true, Ordering::SeqCst);
        }
        reg.consumers.clear();
    }

    fn remove_consumer(&self, id: &str) {
        self.inner.lock().consumers.remove(id);
    }

    fn snapshot_consumers(&self) -> Vec<(String, Arc<Mutex<Filter>>, mpsc::Sender<ChangePayload>)> {
        self.inner
            .lock()
            .consumers
            .iter()
            .map(|(id, c)| (id.clone(), c.filter.clone(), c.tx.clone()))
            .collect()
    }
}

/// A registered producer handle (spec §4.1).
pub struct Producer {
    id: String,
    bus: Bus,
    inflight: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
}

impl Producer {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fan the payload out concurrently to every matching consumer.
    ///
    /// Each per-consumer send has a 1 s deadline; a consumer that misses it
    /// has the event dropped for it and logged, never surfaced as an error
    /// here — per §4.1, consumers re-derive state on wake rather than
    /// relying on event completeness. The overall call itself is bounded to
    /// one in-flight `Notify` per producer; a second call arriving before
    /// the first's fan-out completes within the deadline returns
    /// `ProducerTimeout`.
    pub async fn notify(&self, payload: ChangePayload) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ProducerClosed);
        }

        let permit = match tokio::time::timeout(CONSUMER_SEND_DEADLINE, self.inflight.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(BusError::ProducerClosed),
            Err(_) => return Err(BusError::ProducerTimeout),
        };

        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ProducerClosed);
        }

        let consumers = self.bus.snapshot_consumers();
        let mut sends = Vec::with_capacity(consumers.len());
        for (id, filter, tx) in consumers {
            if !filter.lock().matches(&payload) {
                continue;
            }
            let payload = payload.clone();
            let bus = self.bus.clone();
            sends.push(async move {
                match tokio::time::timeout(CONSUMER_SEND_DEADLINE, tx.send(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        // Receiver dropped: consumer's context was cancelled.
                        // Removed lazily, as specified.
                        bus.remove_consumer(&id);
                    }
                    Err(_) => {
                        tracing::warn!(consumer = %id, "change bus: dropped event after 1s deadline");
                    }
                }
            });
        }
        futures_util::future::join_all(sends).await;

        drop(permit);
        Ok(())
    }
}

/// A registered consumer handle (spec §4.1).
pub struct Consumer {
    id: String,
    bus: Bus,
    filter: Arc<Mutex<Filter>>,
    rx: mpsc::Receiver<ChangePayload>,
}

impl Consumer {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace this consumer's filter at runtime.
    pub fn set_filter(&self, filter: Filter) {
        *self.filter.lock() = filter;
    }

    /// Receive the next matching payload, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<ChangePayload> {
        self.rx.recv().await
    }
}

impl Drop for Consumer {
    // Eager RAII removal stands in for the "removed lazily on next send
    // attempt" wording in spec §4.1, which describes a runtime without
    // destructors; the fan-out loop in `Producer::notify` also removes a
    // consumer whose channel has closed for any other reason.
    fn drop(&mut self) {
        self.bus.remove_consumer(&self.id);
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "bus_proptests.rs"]
mod proptests;
