//! Shared setup for the end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use anchor::Connection;
use anchor::Environment;
use anchor::Frame;
use anchor::Guest;
use anchor::Host;
use anchor::Schema;
use anchor::Window;
use anchor::Worker;
use anchor::transport;
use anchor::transport::Endpoint;
use anchor::transport::Listener;
use anchor::transport::ListenerId;
use anchor::transport::PostOptions;
use anchor::transport::TargetKind;

pub const HOST_ORIGIN: &str = "https://host.test";
pub const GUEST_SRC: &str = "https://guest.test/index.html";

/// Installs a subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Host and guest over an in-page worker. Returns (host side, guest side).
pub async fn connect_worker(host: &Host, host_schema: Schema, guest_schema: Schema) -> (Connection, Connection) {
    let (handle, scope) = Worker::pair();
    let host_handshake = host.connect(handle, host_schema).expect("host connect");
    let guest_handshake = Guest::connect(&Environment::worker(scope), guest_schema).expect("guest connect");
    let (host_side, guest_side) = tokio::join!(host_handshake, guest_handshake);
    (host_side.expect("host handshake"), guest_side.expect("guest handshake"))
}

pub struct FrameSetup {
    pub top: Window,
    pub frame: Frame,
    pub host: Connection,
    pub guest: Connection,
}

/// Host page embedding one frame at [`GUEST_SRC`].
pub async fn connect_frame(host: &Host, host_schema: Schema, guest_schema: Schema) -> FrameSetup {
    let top = Window::top(HOST_ORIGIN);
    let frame = Frame::attach(&top, GUEST_SRC);
    let content = frame.content_window().cloned().expect("attached frame");

    let host_handshake = host.connect(frame.clone(), host_schema).expect("host connect");
    let guest_handshake = Guest::connect(&Environment::window(content), guest_schema).expect("guest connect");
    let (host_side, guest_side) = tokio::join!(host_handshake, guest_handshake);

    FrameSetup {
        top,
        frame,
        host: host_side.expect("host handshake"),
        guest: guest_side.expect("guest handshake"),
    }
}

/// Counts what passes through an endpoint.
pub struct Recording {
    inner: Arc<dyn Endpoint>,
    pub added: AtomicUsize,
    pub removed: AtomicUsize,
    pub terminated: AtomicUsize,
    pub posted: AtomicUsize,
}

impl Recording {
    pub fn wrap(inner: impl Endpoint) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(inner),
            added: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            terminated: AtomicUsize::new(0),
            posted: AtomicUsize::new(0),
        })
    }

    pub fn added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn posted(&self) -> usize {
        self.posted.load(Ordering::SeqCst)
    }
}

impl Endpoint for Recording {
    fn kind(&self) -> TargetKind {
        self.inner.kind()
    }

    fn post_message(&self, message: Value, options: PostOptions) -> transport::Result<()> {
        self.posted.fetch_add(1, Ordering::SeqCst);
        self.inner.post_message(message, options)
    }

    fn add_listener(&self, listener: Listener) -> transport::Result<ListenerId> {
        self.added.fetch_add(1, Ordering::SeqCst);
        self.inner.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.removed.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_listener(id)
    }

    fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        self.inner.terminate()
    }
}

/// Gives in-flight deliveries a chance to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
