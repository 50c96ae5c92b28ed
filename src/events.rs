//! SDK event bus.
//!
//! Listeners are stored as explicit records `{id, callback, once}` in
//! registration order per event kind. A panicking listener is logged and
//! skipped; it never takes down the emitter or the other listeners.

use crate::render::RenderMethod;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Listener count per event above which a leak warning is logged.
pub const MAX_LISTENERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Init,
    Ready,
    Error,
    Destroy,
    Config,
    Render,
    Impression,
    Click,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::Ready => "ready",
            EventKind::Error => "error",
            EventKind::Destroy => "destroy",
            EventKind::Config => "config",
            EventKind::Render => "render",
            EventKind::Impression => "impression",
            EventKind::Click => "click",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkEvent {
    Init { version: &'static str },
    Ready,
    Error { message: String },
    Destroy,
    Config,
    Render {
        slot_id: String,
        success: bool,
        method: RenderMethod,
    },
    Impression { slot_id: String, url: String },
    Click { slot_id: String, url: String },
}

impl SdkEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SdkEvent::Init { .. } => EventKind::Init,
            SdkEvent::Ready => EventKind::Ready,
            SdkEvent::Error { .. } => EventKind::Error,
            SdkEvent::Destroy => EventKind::Destroy,
            SdkEvent::Config => EventKind::Config,
            SdkEvent::Render { .. } => EventKind::Render,
            SdkEvent::Impression { .. } => EventKind::Impression,
            SdkEvent::Click { .. } => EventKind::Click,
        }
    }
}

pub type Listener = Arc<dyn Fn(&SdkEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct ListenerRecord {
    id: ListenerId,
    callback: Listener,
    once: bool,
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<ListenerRecord>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add<F>(&self, kind: EventKind, callback: F, once: bool) -> ListenerId
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write();
        let records = listeners.entry(kind).or_default();
        records.push(ListenerRecord {
            id,
            callback: Arc::new(callback),
            once,
        });

        if records.len() > MAX_LISTENERS {
            warn!(
                event = %kind,
                count = records.len(),
                "Possible listener leak: more than {} listeners registered",
                MAX_LISTENERS
            );
        }
        id
    }

    /// Subscribe to every `kind` event.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        self.add(kind, callback, false)
    }

    /// Subscribe to the next `kind` event only.
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        self.add(kind, callback, true)
    }

    /// Remove one listener. Returns false if it wasn't registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(records) = listeners.get_mut(&kind) else {
            return false;
        };

        let before = records.len();
        records.retain(|record| record.id != id);
        let removed = records.len() != before;
        if records.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }

    /// Remove every listener of `kind`, or of every kind when `None`.
    pub fn off_all(&self, kind: Option<EventKind>) {
        let mut listeners = self.listeners.write();
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Kinds with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<EventKind> {
        let mut names: Vec<EventKind> = self.listeners.read().keys().copied().collect();
        names.sort();
        names
    }

    /// Deliver `event` to its listeners in registration order. Returns the
    /// number of listeners invoked.
    pub fn emit(&self, event: &SdkEvent) -> usize {
        let kind = event.kind();

        // Snapshot and drop `once` records before calling anything, so
        // listeners may subscribe or unsubscribe while being called
        let records = {
            let mut listeners = self.listeners.write();
            let Some(records) = listeners.get_mut(&kind) else {
                return 0;
            };
            let snapshot = records.clone();
            records.retain(|record| !record.once);
            if records.is_empty() {
                listeners.remove(&kind);
            }
            snapshot
        };

        for record in &records {
            let result = catch_unwind(AssertUnwindSafe(|| (record.callback)(event)));
            if result.is_err() {
                error!(event = %kind, "Event listener panicked");
            }
        }
        records.len()
    }
}
