use crate::{
    CancelHandle, DocumentCallback, DocumentListener, DocumentPath, DocumentSnapshot,
    DocumentStore, Listener, StoreError, StoreResult, SyncConfig, WriteBatch,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Requests a [`RemoteStore`] sends to its transport.
pub enum StoreRequest {
    Get {
        path: DocumentPath,
        reply: Sender<StoreResult<DocumentSnapshot>>,
    },
    Commit {
        batch: WriteBatch,
        reply: Sender<StoreResult<()>>,
    },
    Subscribe {
        subscription_id: String,
        path: DocumentPath,
        pushes: Sender<Push>,
        reply: Sender<StoreResult<()>>,
    },
    Unsubscribe(String),
}

/// A document change pushed to one subscription.
#[derive(Debug, Clone)]
pub struct Push {
    pub subscription_id: String,
    pub snapshot: DocumentSnapshot,
}

type ListenerMap = Mutex<HashMap<String, Arc<DocumentListener>>>;

/// Channel-backed client of a push-capable store.
///
/// Requests go out over `requests` and block for a reply up to the configured
/// timeout. Pushes queue up locally and reach callbacks only when the owning
/// thread calls [`dispatch_pending`](Self::dispatch_pending).
pub struct RemoteStore {
    requests: Sender<StoreRequest>,
    push_tx: Sender<Push>,
    push_rx: Receiver<Push>,
    listeners: Arc<ListenerMap>,
    timeout: Duration,
    ordered: bool,
}

impl RemoteStore {
    pub fn new(requests: Sender<StoreRequest>, config: &SyncConfig) -> Self {
        let (push_tx, push_rx) = crossbeam_channel::unbounded();
        Self {
            requests,
            push_tx,
            push_rx,
            listeners: Arc::new(Mutex::new(HashMap::new())),
            timeout: config.request_timeout(),
            ordered: true,
        }
    }

    /// Marks the transport as not preserving per-document push order.
    pub fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }

    /// Delivers every push received so far. Returns the number of callbacks that ran.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(push) = self.push_rx.try_recv() {
            if self.deliver(push) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Waits up to `timeout` for one push, then delivers everything queued.
    pub fn wait_and_dispatch(&self, timeout: Duration) -> usize {
        match self.push_rx.recv_timeout(timeout) {
            Ok(push) => usize::from(self.deliver(push)) + self.dispatch_pending(),
            Err(_) => 0,
        }
    }

    fn deliver(&self, push: Push) -> bool {
        let listener = self.listeners.lock().get(&push.subscription_id).cloned();
        match listener {
            Some(listener) => listener.deliver(push.snapshot),
            None => {
                tracing::debug!(subscription = %push.subscription_id, "dropping push for closed subscription");
                false
            }
        }
    }

    fn request<T>(&self, build: impl FnOnce(Sender<StoreResult<T>>) -> StoreRequest) -> StoreResult<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.requests
            .send(build(reply_tx))
            .map_err(|_| StoreError::Unavailable("store transport closed".to_string()))?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StoreError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Unavailable(
                "store transport dropped the request".to_string(),
            )),
        }
    }
}

impl DocumentStore for RemoteStore {
    fn get_document(&self, path: &DocumentPath) -> StoreResult<DocumentSnapshot> {
        self.request(|reply| StoreRequest::Get {
            path: path.clone(),
            reply,
        })
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.request(|reply| StoreRequest::Commit { batch, reply })
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: DocumentCallback,
    ) -> StoreResult<CancelHandle> {
        let listener = Listener::new(callback);
        let subscription_id = listener.id().to_string();
        self.listeners
            .lock()
            .insert(subscription_id.clone(), listener.clone());

        let subscribed = self.request(|reply| StoreRequest::Subscribe {
            subscription_id: subscription_id.clone(),
            path: path.clone(),
            pushes: self.push_tx.clone(),
            reply,
        });
        if let Err(error) = subscribed {
            self.listeners.lock().remove(&subscription_id);
            let _ = self
                .requests
                .send(StoreRequest::Unsubscribe(subscription_id));
            return Err(error);
        }

        let listeners: Weak<ListenerMap> = Arc::downgrade(&self.listeners);
        let requests = self.requests.clone();
        Ok(listener.handle(Box::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().remove(&subscription_id);
            }
            let _ = requests.send(StoreRequest::Unsubscribe(subscription_id));
        })))
    }

    fn guarantees_document_order(&self) -> bool {
        self.ordered
    }
}

/// Serves [`StoreRequest`]s against a backing store. Any number of
/// [`RemoteStore`] clients may share one server.
pub struct StoreServer {
    backend: Arc<dyn DocumentStore>,
    subscriptions: HashMap<String, CancelHandle>,
}

impl StoreServer {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            subscriptions: HashMap::new(),
        }
    }

    /// Runs a server on its own thread. The thread exits once every request
    /// sender has been dropped.
    pub fn spawn(backend: Arc<dyn DocumentStore>) -> (Sender<StoreRequest>, JoinHandle<()>) {
        let (requests_tx, requests_rx) = crossbeam_channel::unbounded();
        let server = Self::new(backend);
        let handle = std::thread::spawn(move || server.serve(requests_rx));
        (requests_tx, handle)
    }

    pub fn serve(mut self, requests: Receiver<StoreRequest>) {
        for request in requests.iter() {
            self.handle(request);
        }
        tracing::debug!(
            open_subscriptions = self.subscriptions.len(),
            "store server stopped"
        );
    }

    pub fn handle(&mut self, request: StoreRequest) {
        match request {
            StoreRequest::Get { path, reply } => {
                let _ = reply.send(self.backend.get_document(&path));
            }
            StoreRequest::Commit { batch, reply } => {
                let _ = reply.send(self.backend.commit(batch));
            }
            StoreRequest::Subscribe {
                subscription_id,
                path,
                pushes,
                reply,
            } => {
                let id = subscription_id.clone();
                let subscribed = self.backend.subscribe_document(
                    &path,
                    Box::new(move |snapshot: DocumentSnapshot| {
                        let _ = pushes.send(Push {
                            subscription_id: id.clone(),
                            snapshot,
                        });
                    }),
                );
                match subscribed {
                    Ok(handle) => {
                        self.subscriptions.insert(subscription_id, handle);
                        let _ = reply.send(Ok(()));
                    }
                    Err(error) => {
                        let _ = reply.send(Err(error));
                    }
                }
            }
            StoreRequest::Unsubscribe(subscription_id) => {
                if let Some(handle) = self.subscriptions.remove(&subscription_id) {
                    handle.cancel();
                }
            }
        }
    }
}
