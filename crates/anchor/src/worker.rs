//! # Workers & Threads
//!
//! Guests that run off the page: an in-page worker (a Tokio task) and a
//! worker thread (an OS thread with its own current-thread runtime). Each is
//! a pair of mailboxes; the handle is the host's end, the scope or parent
//! port is the guest's end.
//!
//! ## Invariants
//!
//! - Workers deliver events without origin or source; threads deliver bare
//!   values.
//! - Termination is one-shot: both directions close and the guest's task is
//!   stopped exactly once, however many times `terminate` is called.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::mailbox::Mailbox;
use crate::transport::Delivery;
use crate::transport::Endpoint;
use crate::transport::Listener;
use crate::transport::ListenerId;
use crate::transport::MessageEvent;
use crate::transport::PostOptions;
use crate::transport::Result;
use crate::transport::TargetKind;

type Stop = Box<dyn FnOnce() + Send>;

struct Pair {
    kind: TargetKind,
    to_guest: Mailbox,
    to_host: Mailbox,
    terminated: AtomicBool,
    stop: Mutex<Option<Stop>>,
}

impl Pair {
    fn new(kind: TargetKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            to_guest: Mailbox::new(),
            to_host: Mailbox::new(),
            terminated: AtomicBool::new(false),
            stop: Mutex::new(None),
        })
    }

    fn wrap(&self, data: Value, options: PostOptions) -> Delivery {
        match self.kind {
            TargetKind::Thread => Delivery::Raw {
                data,
                transfer: options.transfer,
            },
            _ => Delivery::Event(MessageEvent {
                data,
                origin: None,
                source: None,
                transfer: options.transfer,
            }),
        }
    }

    fn on_stop(&self, stop: Stop) {
        *self.stop.lock() = Some(stop);
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(kind = %self.kind, "terminating guest");
        self.to_guest.close();
        self.to_host.close();
        let stop = self.stop.lock().take();
        if let Some(stop) = stop {
            stop();
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

/// Constructors for in-page workers.
pub struct Worker;

impl Worker {
    /// Two connected ends with nothing running behind them.
    pub fn pair() -> (WorkerHandle, WorkerScope) {
        let pair = Pair::new(TargetKind::Worker);
        (WorkerHandle { pair: pair.clone() }, WorkerScope { pair })
    }

    /// Runs `body` as a task on the current runtime. Terminating the handle
    /// aborts the task.
    pub fn spawn<F, Fut>(body: F) -> WorkerHandle
    where
        F: FnOnce(WorkerScope) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (handle, scope) = Self::pair();
        let task = tokio::spawn(body(scope));
        handle.pair.on_stop(Box::new(move || task.abort()));
        handle
    }
}

/// The host's end of a worker.
#[derive(Clone)]
pub struct WorkerHandle {
    pair: Arc<Pair>,
}

impl WorkerHandle {
    pub fn is_terminated(&self) -> bool {
        self.pair.is_terminated()
    }

    pub fn listener_count(&self) -> usize {
        self.pair.to_host.listener_count()
    }
}

impl Endpoint for WorkerHandle {
    fn kind(&self) -> TargetKind {
        TargetKind::Worker
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        self.pair.to_guest.deliver(self.pair.wrap(message, options))
    }

    fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        self.pair.to_host.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.pair.to_host.remove_listener(id)
    }

    fn terminate(&self) {
        self.pair.terminate()
    }
}

/// A worker's own global scope. Posting here reaches the host.
#[derive(Clone)]
pub struct WorkerScope {
    pair: Arc<Pair>,
}

impl WorkerScope {
    pub fn listener_count(&self) -> usize {
        self.pair.to_guest.listener_count()
    }
}

impl Endpoint for WorkerScope {
    fn kind(&self) -> TargetKind {
        TargetKind::Worker
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        self.pair.to_host.deliver(self.pair.wrap(message, options))
    }

    fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        self.pair.to_guest.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.pair.to_guest.remove_listener(id)
    }
}

/// Constructors for worker threads.
pub struct Thread;

impl Thread {
    pub fn pair() -> (ThreadHandle, ParentPort) {
        let pair = Pair::new(TargetKind::Thread);
        (ThreadHandle { pair: pair.clone() }, ParentPort { pair })
    }

    /// Runs `body` on a new OS thread with its own current-thread runtime.
    ///
    /// The runtime outlives `body` so that listeners it installed keep
    /// answering; it stops when the handle is terminated.
    pub fn spawn<F, Fut>(body: F) -> std::io::Result<ThreadHandle>
    where
        F: FnOnce(ParentPort) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let (handle, port) = Self::pair();
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name("anchor-thread".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let run = async move {
                        body(port).await;
                        std::future::pending::<()>().await
                    };
                    tokio::select! {
                        _ = run => {}
                        _ = stop_rx => {}
                    }
                });
            })?;

        handle.pair.on_stop(Box::new(move || {
            let _ = stop_tx.send(());
        }));
        Ok(handle)
    }
}

/// The host's end of a worker thread.
#[derive(Clone)]
pub struct ThreadHandle {
    pair: Arc<Pair>,
}

impl ThreadHandle {
    pub fn is_terminated(&self) -> bool {
        self.pair.is_terminated()
    }

    pub fn listener_count(&self) -> usize {
        self.pair.to_host.listener_count()
    }
}

impl Endpoint for ThreadHandle {
    fn kind(&self) -> TargetKind {
        TargetKind::Thread
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        self.pair.to_guest.deliver(self.pair.wrap(message, options))
    }

    fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        self.pair.to_host.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.pair.to_host.remove_listener(id)
    }

    fn terminate(&self) {
        self.pair.terminate()
    }
}

/// A worker thread's port to the thread that spawned it.
#[derive(Clone)]
pub struct ParentPort {
    pair: Arc<Pair>,
}

impl ParentPort {
    pub fn listener_count(&self) -> usize {
        self.pair.to_guest.listener_count()
    }
}

impl Endpoint for ParentPort {
    fn kind(&self) -> TargetKind {
        TargetKind::Thread
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        self.pair.to_host.deliver(self.pair.wrap(message, options))
    }

    fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        self.pair.to_guest.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.pair.to_guest.remove_listener(id)
    }
}
