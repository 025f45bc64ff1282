//! Inbox behind every in-memory endpoint.
//!
//! Posting only enqueues. A pump task, started by the first listener, drains
//! the queue and hands each delivery to a snapshot of the listeners, so a
//! listener may add or remove listeners (including itself) while running.
//! Listeners added mid-delivery wait for the next one; listeners removed
//! mid-delivery are skipped.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::Delivery;
use crate::transport::Error;
use crate::transport::Listener;
use crate::transport::ListenerId;
use crate::transport::Result;

#[derive(Clone)]
pub(crate) struct Mailbox {
    inner: Arc<Inner>,
}

struct Inner {
    listeners: DashMap<ListenerId, Listener>,
    next_id: AtomicU64,
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    closed: AtomicBool,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn deliver(&self, delivery: Delivery) -> Result<()> {
        let tx = self.inner.tx.lock();
        let tx = tx.as_ref().ok_or(Error::Terminated)?;
        tx.send(delivery).map_err(|_| Error::Terminated)
    }

    pub fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        if self.is_closed() {
            return Err(Error::Terminated);
        }
        self.start()?;
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.insert(id, listener);
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Stops delivery for good. Queued messages are dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.tx.lock().take();
        self.inner.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Spawns the pump on the caller's runtime, once.
    fn start(&self) -> Result<()> {
        let mut slot = self.inner.rx.lock();
        if slot.is_none() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let Some(rx) = slot.take() else {
            return Ok(());
        };
        runtime.spawn(pump(Arc::downgrade(&self.inner), rx));
        Ok(())
    }
}

async fn pump(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if inner.closed.load(Ordering::Acquire) {
            break;
        }

        let mut listeners: Vec<(ListenerId, Listener)> = inner
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (id, listener) in listeners {
            if inner.closed.load(Ordering::Acquire) {
                break;
            }
            // Removed by an earlier listener of this same delivery.
            if !inner.listeners.contains_key(&id) {
                continue;
            }
            listener(&delivery);
        }
    }
}
