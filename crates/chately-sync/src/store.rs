use crate::{
    CancelHandle, DocumentCallback, DocumentListener, DocumentPath, DocumentSnapshot,
    FieldUpdates, Listener, StoreError, StoreResult, WriteBatch,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Push-capable document store consumed by the sync core.
///
/// Implementations must deliver changes of one document to its subscribers
/// in the order the writes were applied. Stores that cannot promise this
/// return `false` from [`guarantees_document_order`](Self::guarantees_document_order).
pub trait DocumentStore: Send + Sync {
    fn get_document(&self, path: &DocumentPath) -> StoreResult<DocumentSnapshot>;

    /// Applies every write in `batch` or none of them.
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Registers `callback` for changes to `path`. The current snapshot is
    /// delivered first, even when the document does not exist yet.
    fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: DocumentCallback,
    ) -> StoreResult<CancelHandle>;

    /// With `merge`, nested maps are merged key by key into the existing document.
    fn set_document(&self, path: &DocumentPath, data: Value, merge: bool) -> StoreResult<()> {
        self.commit(WriteBatch::new().set(path.clone(), data, merge))
    }

    /// Fails with [`StoreError::NotFound`] when the document does not exist.
    fn update_fields(&self, path: &DocumentPath, fields: FieldUpdates) -> StoreResult<()> {
        self.commit(WriteBatch::new().update(path.clone(), fields))
    }

    fn guarantees_document_order(&self) -> bool {
        true
    }
}

struct StoredDocument {
    data: Value,
    version: u64,
}

struct Delivery {
    listeners: Vec<Arc<DocumentListener>>,
    snapshot: DocumentSnapshot,
}

#[derive(Default)]
struct Faults {
    write: Option<StoreError>,
    subscribe: Option<StoreError>,
}

struct Inner {
    documents: Mutex<HashMap<DocumentPath, StoredDocument>>,
    listeners: Mutex<HashMap<DocumentPath, Vec<Arc<DocumentListener>>>>,
    queue: Mutex<VecDeque<Delivery>>,
    dispatching: AtomicBool,
    manual_delivery: bool,
    faults: Mutex<Faults>,
}

/// Process-local store. Pushes are queued at write time and drained by one
/// dispatcher at a time, which keeps per-document order across threads and
/// lets callbacks write back into the store.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Holds every push until [`flush_deliveries`](Self::flush_deliveries) is called.
    pub fn with_manual_delivery() -> Self {
        Self::build(true)
    }

    fn build(manual_delivery: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                dispatching: AtomicBool::new(false),
                manual_delivery,
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    /// The next `commit` fails with `error` and changes nothing.
    pub fn fail_next_write(&self, error: StoreError) {
        self.inner.faults.lock().write = Some(error);
    }

    /// The next `subscribe_document` fails with `error`.
    pub fn fail_next_subscribe(&self, error: StoreError) {
        self.inner.faults.lock().subscribe = Some(error);
    }

    pub fn pending_deliveries(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Delivers queued pushes. Returns the number of callbacks that ran.
    pub fn flush_deliveries(&self) -> usize {
        self.drain()
    }

    pub fn listener_count(&self, path: &DocumentPath) -> usize {
        self.inner
            .listeners
            .lock()
            .get(path)
            .map_or(0, |listeners| listeners.len())
    }

    pub fn paths(&self) -> Vec<DocumentPath> {
        let mut paths: Vec<DocumentPath> = self.inner.documents.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Loads a document without notifying anyone.
    pub fn seed(&self, path: DocumentPath, data: Value) {
        let mut documents = self.inner.documents.lock();
        let version = documents.get(&path).map_or(0, |doc| doc.version) + 1;
        documents.insert(path, StoredDocument { data, version });
    }

    fn snapshot_of(
        documents: &HashMap<DocumentPath, StoredDocument>,
        path: &DocumentPath,
    ) -> DocumentSnapshot {
        match documents.get(path) {
            Some(doc) => DocumentSnapshot {
                path: path.clone(),
                data: Some(doc.data.clone()),
                version: doc.version,
            },
            None => DocumentSnapshot::missing(path.clone()),
        }
    }

    fn schedule(&self) {
        if !self.inner.manual_delivery {
            self.drain();
        }
    }

    fn drain(&self) -> usize {
        let mut delivered = 0;
        loop {
            if self
                .inner
                .dispatching
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Another dispatcher (possibly our own caller) drains the queue.
                return delivered;
            }

            loop {
                let next = self.inner.queue.lock().pop_front();
                let Some(delivery) = next else {
                    break;
                };
                for listener in &delivery.listeners {
                    if listener.deliver(delivery.snapshot.clone()) {
                        delivered += 1;
                    }
                }
            }

            self.inner.dispatching.store(false, Ordering::Release);
            if self.inner.queue.lock().is_empty() {
                return delivered;
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryStore {
    fn get_document(&self, path: &DocumentPath) -> StoreResult<DocumentSnapshot> {
        let documents = self.inner.documents.lock();
        Ok(Self::snapshot_of(&documents, path))
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if let Some(error) = self.inner.faults.lock().write.take() {
            return Err(error);
        }
        if batch.is_empty() {
            return Ok(());
        }

        {
            let mut documents = self.inner.documents.lock();

            let mut staged: HashMap<DocumentPath, Value> = HashMap::new();
            let mut touched: Vec<DocumentPath> = Vec::new();
            for op in batch.ops() {
                let path = op.path();
                let current = staged
                    .get(path)
                    .or_else(|| documents.get(path).map(|doc| &doc.data));
                let next = op.apply(current)?;
                if !touched.contains(path) {
                    touched.push(path.clone());
                }
                staged.insert(path.clone(), next);
            }

            let listeners = self.inner.listeners.lock();
            let mut queue = self.inner.queue.lock();
            for path in touched {
                let Some(data) = staged.remove(&path) else {
                    continue;
                };
                let version = documents.get(&path).map_or(0, |doc| doc.version) + 1;
                documents.insert(path.clone(), StoredDocument { data, version });

                if let Some(subscribers) = listeners.get(&path) {
                    if !subscribers.is_empty() {
                        queue.push_back(Delivery {
                            listeners: subscribers.clone(),
                            snapshot: Self::snapshot_of(&documents, &path),
                        });
                    }
                }
            }
        }

        self.schedule();
        Ok(())
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: DocumentCallback,
    ) -> StoreResult<CancelHandle> {
        if let Some(error) = self.inner.faults.lock().subscribe.take() {
            return Err(error);
        }

        let listener = Listener::new(callback);
        {
            let documents = self.inner.documents.lock();
            let mut listeners = self.inner.listeners.lock();
            let mut queue = self.inner.queue.lock();
            listeners
                .entry(path.clone())
                .or_default()
                .push(listener.clone());
            queue.push_back(Delivery {
                listeners: vec![listener.clone()],
                snapshot: Self::snapshot_of(&documents, path),
            });
        }

        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let registered_path = path.clone();
        let listener_id = listener.id().to_string();
        let handle = listener.handle(Box::new(move || {
            if let Some(inner) = registry.upgrade() {
                let mut listeners = inner.listeners.lock();
                if let Some(subscribers) = listeners.get_mut(&registered_path) {
                    subscribers.retain(|l| l.id() != listener_id);
                    if subscribers.is_empty() {
                        listeners.remove(&registered_path);
                    }
                }
            }
        }));

        tracing::debug!(path = %path, subscription = %handle.id(), "document subscribed");
        self.schedule();
        Ok(handle)
    }
}
