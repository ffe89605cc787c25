use crate::DocumentSnapshot;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type Unsubscribe = Box<dyn FnOnce() + Send>;

pub type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

pub type DocumentCallback = Callback<DocumentSnapshot>;

pub type DocumentListener = Listener<DocumentSnapshot>;

/// Shared between a listener and its handle. Deliveries hold `delivery` for
/// the whole callback so `cancel` can wait them out.
struct Gate {
    cancelled: AtomicBool,
    delivery: ReentrantMutex<()>,
}

/// A registered callback as seen by whoever delivers to it.
pub struct Listener<T> {
    id: String,
    gate: Arc<Gate>,
    callback: Callback<T>,
}

impl<T> Listener<T> {
    pub fn new(callback: Callback<T>) -> Arc<Self> {
        Arc::new(Self {
            id: format!("sub-{}", uuid::Uuid::new_v4()),
            gate: Arc::new(Gate {
                cancelled: AtomicBool::new(false),
                delivery: ReentrantMutex::new(()),
            }),
            callback,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.cancelled.load(Ordering::Acquire)
    }

    /// Runs the callback unless the listener was cancelled. Returns whether it ran.
    pub fn deliver(&self, value: T) -> bool {
        let _delivery = self.gate.delivery.lock();
        if self.is_cancelled() {
            tracing::debug!(subscription = %self.id, "discarding delivery after cancel");
            return false;
        }
        (self.callback)(value);
        true
    }

    /// Creates the handle that cancels this listener. `unsubscribe` runs once,
    /// after the gate is closed, to drop the listener from its registry.
    pub fn handle(&self, unsubscribe: Unsubscribe) -> CancelHandle {
        CancelHandle {
            id: self.id.clone(),
            gate: self.gate.clone(),
            unsubscribe: Mutex::new(Some(unsubscribe)),
        }
    }
}

/// Stops deliveries to one subscription. Dropping the handle cancels it.
pub struct CancelHandle {
    id: String,
    gate: Arc<Gate>,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl CancelHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Idempotent. Once this returns the callback will not run again; a
    /// delivery running on another thread is waited for.
    pub fn cancel(&self) {
        let first = !self.gate.cancelled.swap(true, Ordering::AcqRel);
        drop(self.gate.delivery.lock());

        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
        if first {
            tracing::debug!(subscription = %self.id, "subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
