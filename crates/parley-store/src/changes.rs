//! Change events and the subscriptions that deliver them.
//!
//! A [`Subscription`] is a receiver plus a teardown hook; dropping it
//! unsubscribes.  [`ChangeHub`] is the fan-out registry a backend publishes
//! committed writes into.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::query::{Filter, Row};
use crate::schema::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed write, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// Row after the write (insert, update).
    pub new: Option<Row>,
    /// Row before the write (update, delete).
    pub old: Option<Row>,
}

impl ChangeEvent {
    pub fn inserted(table: Table, row: Row) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn updated(table: Table, old: Row, new: Row) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn deleted(table: Table, row: Row) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new: None,
            old: Some(row),
        }
    }

    /// The row the event is about: the new image if any, else the old one.
    pub fn record(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub kinds: Vec<ChangeKind>,
    pub predicate: Option<Filter>,
}

impl ChangeFilter {
    /// Every insert, update and delete on `table`.
    pub fn all(table: Table) -> Self {
        Self::kinds(table, &[ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete])
    }

    pub fn kinds(table: Table, kinds: &[ChangeKind]) -> Self {
        Self {
            table,
            kinds: kinds.to_vec(),
            predicate: None,
        }
    }

    /// Only rows whose `column` equals `value`.
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.predicate = Some(Filter::eq(column, value));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.kinds.contains(&event.kind) {
            return false;
        }
        match (&self.predicate, event.record()) {
            (None, _) => true,
            (Some(predicate), Some(row)) => predicate.matches(row),
            (Some(_), None) => false,
        }
    }
}

/// Live handle on a change-event stream.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a receiver; `on_drop` runs exactly once when the handle goes away.
    pub fn new(
        rx: mpsc::UnboundedReceiver<ChangeEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Next event, or `None` once the backend has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct Sink {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    sinks: HashMap<u64, Sink>,
}

/// Fan-out registry of change subscribers.
#[derive(Default, Clone)]
pub struct ChangeHub {
    inner: Arc<Mutex<HubInner>>,
}

fn lock(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    // The registry holds no invariants a panicking holder could break.
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            debug!(sub = id, table = %filter.table, kinds = ?filter.kinds, "subscribed");
            inner.sinks.insert(id, Sink { filter, tx });
            id
        };

        let registry: Weak<Mutex<HubInner>> = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(inner) = registry.upgrade() {
                lock(&inner).sinks.remove(&id);
                debug!(sub = id, "unsubscribed");
            }
        })
    }

    /// Deliver `event` to every matching subscriber.  Sinks whose receiver
    /// is gone are pruned.
    pub fn publish(&self, event: &ChangeEvent) {
        let mut inner = lock(&self.inner);
        let mut delivered = 0usize;
        inner.sinks.retain(|_, sink| {
            if !sink.filter.matches(event) {
                return true;
            }
            if sink.tx.send(event.clone()).is_err() {
                return false;
            }
            delivered += 1;
            true
        });
        debug!(table = %event.table, kind = ?event.kind, delivered, "published change");
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).sinks.len()
    }
}
