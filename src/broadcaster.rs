//! Fan-out of decoded records to registered listeners.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

use crate::data::MeasurementRecord;

/// A registered listener.
pub type Listener = Arc<dyn Fn(&MeasurementRecord) + Send + Sync>;

type Registry = Arc<RwLock<HashMap<u64, Listener>>>;

/// Handle for unregistering a listener.
///
/// Dropping the handle unregisters the listener.
#[must_use = "dropping the handle removes the listener"]
pub struct ListenerHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this listener.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the listener ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

/// Delivers each record to every registered listener.
///
/// Delivery order between listeners is unspecified. A listener that panics
/// is logged and skipped; the others still receive the record.
#[derive(Default)]
pub struct UpdateBroadcaster {
    /// Registered listeners by ID.
    listeners: Registry,
    /// Listener ID counter.
    next_id: AtomicU64,
}

impl UpdateBroadcaster {
    /// Create a broadcaster with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&MeasurementRecord) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(id, Arc::new(callback));

        let registry = Arc::downgrade(&self.listeners);
        ListenerHandle::new(id, move || {
            if let Some(registry) = registry.upgrade() {
                registry.write().remove(&id);
            }
        })
    }

    /// Unregister a listener.
    ///
    /// A publish already in progress may still deliver to it once.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        handle.unregister();
    }

    /// Deliver `record` to a snapshot of the current listeners.
    pub fn publish(&self, record: &MeasurementRecord) {
        let snapshot: Vec<(u64, Listener)> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        trace!("Publishing {:?} to {} listeners", record, snapshot.len());

        for (id, listener) in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(record))) {
                error!("Listener {} panicked: {}", id, panic_message(&*panic));
            }
        }
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
