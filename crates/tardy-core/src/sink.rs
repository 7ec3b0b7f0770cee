//! Event delivery capability.
//!
//! Passed explicitly into a run; there is no ambient listener registry.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::event::{Event, EventKind};

/// Accepts fully-built events. Delivery (mail, logs, ...) is the sink's business.
pub trait EventSink: Send + Sync {
    /// Whether anybody listens for `kind`. Events of unlistened kinds are
    /// never built.
    fn is_listener_registered(&self, kind: EventKind) -> bool;

    /// Deliver an event scoped to `tenant`.
    fn fire_session(&self, tenant: &str, event: Event);

    /// Deliver a process-wide event.
    fn fire_global(&self, event: Event);
}

/// Sink that keeps every delivered event in memory.
#[derive(Debug)]
pub struct RecordingSink {
    listening: BTreeSet<EventKind>,
    delivered: Mutex<Vec<Delivered>>,
}

/// One event as received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// `None` for global events.
    pub tenant: Option<String>,
    pub event: Event,
}

impl RecordingSink {
    /// Sink listening for every event kind.
    #[must_use]
    pub fn listening_to_all() -> Self {
        Self::listening_to(EventKind::ALL)
    }

    #[must_use]
    pub fn listening_to(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            listening: kinds.into_iter().collect(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Drain everything delivered so far.
    pub fn take(&self) -> Vec<Delivered> {
        std::mem::take(&mut *self.lock())
    }

    /// Kinds delivered for `id`, in delivery order.
    #[must_use]
    pub fn kinds_for(&self, id: i64) -> Vec<EventKind> {
        self.lock()
            .iter()
            .filter(|d| d.event.position.id.0 == id)
            .map(|d| d.event.kind)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Delivered>> {
        self.delivered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EventSink for RecordingSink {
    fn is_listener_registered(&self, kind: EventKind) -> bool {
        self.listening.contains(&kind)
    }

    fn fire_session(&self, tenant: &str, event: Event) {
        self.lock().push(Delivered {
            tenant: Some(tenant.to_string()),
            event,
        });
    }

    fn fire_global(&self, event: Event) {
        self.lock().push(Delivered {
            tenant: None,
            event,
        });
    }
}
