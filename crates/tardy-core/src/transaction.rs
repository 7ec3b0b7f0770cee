//! Deferred commit of one reconciliation run.
//!
//! A [`Transaction`] collects two FIFO queues while the run executes:
//!
//! - **mutations**: every write issued through [`Transaction::state`] is
//!   captured as a [`StateWrite`] instead of reaching the store;
//! - **events**: plain [`Event`]s and lazy thunks that build one.
//!
//! [`Transaction::commit`] is the only place either queue is drained:
//!
//! 1. lazy events are resolved, skipping kinds nobody listens to;
//! 2. mutations are applied to the real store in enqueue order, as one
//!    [`StateStore::replace_batch`];
//! 3. events are delivered in enqueue order, routed by [`EventScope`].
//!
//! Dropping a transaction without committing discards both queues. Because
//! the store only ever sees writes in step 2, an aborted run leaves no trace.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{ReconcileError, SourceError, StoreError};
use crate::event::{Event, EventKind, EventScope};
use crate::sink::EventSink;
use crate::store::{StateStore, StateWrite};

type EventThunk<'a> = Box<dyn FnOnce() -> Result<Event, SourceError> + Send + 'a>;

enum PendingEvent<'a> {
    Ready(Event),
    Lazy { kind: EventKind, build: EventThunk<'a> },
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub mutations_applied: usize,
    pub events_fired: usize,
    /// Lazy events dropped at commit because no listener was registered.
    pub events_skipped: usize,
}

/// Buffer of state writes and events for one run against one tenant.
pub struct Transaction<'a> {
    tenant: String,
    store: &'a dyn StateStore,
    sink: &'a dyn EventSink,
    mutations: Mutex<Vec<StateWrite>>,
    events: Mutex<VecDeque<PendingEvent<'a>>>,
}

impl<'a> Transaction<'a> {
    #[must_use]
    pub fn new(tenant: &str, store: &'a dyn StateStore, sink: &'a dyn EventSink) -> Self {
        Self {
            tenant: tenant.to_string(),
            store,
            sink,
            mutations: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Whether the sink has a listener for `kind`.
    #[must_use]
    pub fn listens(&self, kind: EventKind) -> bool {
        self.sink.is_listener_registered(kind)
    }

    /// Queue a ready-made event.
    pub fn fire(&self, event: Event) {
        lock(&self.events).push_back(PendingEvent::Ready(event));
    }

    /// Queue an event that is only built at commit, and only if `kind` still
    /// has a listener then.
    pub fn fire_lazy<F>(&self, kind: EventKind, build: F)
    where
        F: FnOnce() -> Result<Event, SourceError> + Send + 'a,
    {
        lock(&self.events).push_back(PendingEvent::Lazy {
            kind,
            build: Box::new(build),
        });
    }

    /// Store view whose writes are deferred into this transaction.
    #[must_use]
    pub const fn state(&self) -> TransactionalStore<'_, 'a> {
        TransactionalStore { tx: self }
    }

    /// Number of queued `(mutations, events)`.
    #[must_use]
    pub fn pending(&self) -> (usize, usize) {
        (lock(&self.mutations).len(), lock(&self.events).len())
    }

    fn defer(&self, write: StateWrite) {
        lock(&self.mutations).push(write);
    }

    /// Apply queued mutations, then deliver queued events.
    ///
    /// Committing an empty transaction is a no-op.
    ///
    /// # Errors
    ///
    /// A lazy event that fails to build aborts before any mutation is
    /// applied. A failing batch aborts before any event is delivered; how
    /// much of it persisted is up to [`StateStore::replace_batch`].
    pub fn commit(self) -> Result<CommitReport, ReconcileError> {
        let mutations = into_inner(self.mutations);
        let pending = into_inner(self.events);
        let mut report = CommitReport::default();

        let mut resolved = Vec::with_capacity(pending.len());
        for event in pending {
            match event {
                PendingEvent::Ready(event) => resolved.push(event),
                PendingEvent::Lazy { kind, build } => {
                    if self.sink.is_listener_registered(kind) {
                        resolved.push(build()?);
                    } else {
                        report.events_skipped += 1;
                    }
                }
            }
        }

        if !mutations.is_empty() {
            self.store.replace_batch(&mutations)?;
            report.mutations_applied = mutations.len();
        }

        for event in resolved {
            tracing::debug!(
                tenant = %self.tenant,
                kind = %event.kind,
                position = %event.position.id,
                "firing event"
            );
            match event.kind.scope() {
                EventScope::Session => self.sink.fire_session(&self.tenant, event),
                EventScope::Global => self.sink.fire_global(event),
            }
            report.events_fired += 1;
        }

        Ok(report)
    }
}

/// [`StateStore`] view over a transaction: reads pass straight through,
/// writes are queued until commit.
pub struct TransactionalStore<'t, 'a> {
    tx: &'t Transaction<'a>,
}

impl StateStore for TransactionalStore<'_, '_> {
    fn values(&self, namespace: &str, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        self.tx.store.values(namespace, key)
    }

    fn replace_values(
        &self,
        namespace: &str,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        self.tx.defer(StateWrite {
            namespace: namespace.to_string(),
            key: key.to_string(),
            values: values.to_vec(),
        });
        Ok(())
    }

    fn replace_batch(&self, writes: &[StateWrite]) -> Result<(), StoreError> {
        lock(&self.tx.mutations).extend_from_slice(writes);
        Ok(())
    }

    fn is_initialized(&self, namespace: &str) -> Result<bool, StoreError> {
        self.tx.store.is_initialized(namespace)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    mutex.into_inner().unwrap_or_else(PoisonError::into_inner)
}
