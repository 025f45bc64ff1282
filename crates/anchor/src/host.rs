//! # Host
//!
//! The side that holds the guest's handle. `connect` listens for the
//! guest's `HANDSHAKE_REQUEST`, wires both directions of calls, replies with
//! its own schema, and resolves once the guest acknowledges.
//!
//! ## Invariants
//!
//! - A frame's requests are believed only if they come from the frame's
//!   content window AND from the origin of the frame's `src`.
//! - One connect serves one connection: a repeated request for it is
//!   ignored, with no second reply.
//! - The connection is in the registry before the reply is posted.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use anchorpc::ConnectionId;
use anchorpc::HandshakeReply;
use anchorpc::HandshakeRequest;
use anchorpc::Message;

use crate::connection::Connection;
use crate::connection::Registry;
use crate::handshake::Error;
use crate::handshake::Handshake;
use crate::handshake::Result;
use crate::link::Disposer;
use crate::link::Link;
use crate::link::Trust;
use crate::options::HostOptions;
use crate::rpc::register_local_methods;
use crate::rpc::register_remote_methods;
use crate::schema::MethodMap;
use crate::schema::Schema;
use crate::schema::extract_methods;
use crate::transport;
use crate::transport::Endpoint;
use crate::window::Frame;
use crate::worker::ThreadHandle;
use crate::worker::WorkerHandle;

/// What a host can connect to.
#[derive(Clone)]
pub enum GuestTarget {
    Frame(Frame),
    Worker(WorkerHandle),
    Thread(ThreadHandle),
    /// Any other endpoint the host owns; treated like a worker.
    Endpoint(Arc<dyn Endpoint>),
}

impl GuestTarget {
    /// The channel to the guest and the rule for trusting what it sends.
    pub fn link(&self) -> transport::Result<Link> {
        match self {
            Self::Frame(frame) => {
                let content = frame
                    .content_window()
                    .ok_or_else(|| transport::Error::NoTarget(format!("frame '{}' is not attached", frame.src())))?;
                let origin = frame
                    .origin()
                    .ok_or_else(|| transport::Error::NoTarget(format!("frame src '{}' has no origin", frame.src())))?;
                let parent = frame.parent();
                Ok(Link::new(Arc::new(parent.clone()), Arc::new(parent.proxy(content)))
                    .with_trust(Trust::Window {
                        origin: Some(origin.clone()),
                        source: content.id(),
                    })
                    .with_target_origin(origin))
            }
            Self::Worker(handle) => Ok(Link::duplex(Arc::new(handle.clone()))),
            Self::Thread(handle) => Ok(Link::duplex(Arc::new(handle.clone()))),
            Self::Endpoint(endpoint) => Ok(Link::duplex(endpoint.clone())),
        }
    }

    /// Whether closing the connection should terminate the guest.
    pub fn is_owned(&self) -> bool {
        !matches!(self, Self::Frame(_))
    }
}

impl From<Frame> for GuestTarget {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<WorkerHandle> for GuestTarget {
    fn from(handle: WorkerHandle) -> Self {
        Self::Worker(handle)
    }
}

impl From<ThreadHandle> for GuestTarget {
    fn from(handle: ThreadHandle) -> Self {
        Self::Thread(handle)
    }
}

impl From<Arc<dyn Endpoint>> for GuestTarget {
    fn from(endpoint: Arc<dyn Endpoint>) -> Self {
        Self::Endpoint(endpoint)
    }
}

/// Accepts guests and keeps their live connections.
#[derive(Clone, Default)]
pub struct Host {
    registry: Registry,
    options: HostOptions,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: HostOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares `registry` with other hosts.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connect(&self, guest: impl Into<GuestTarget>, schema: Schema) -> Result<Handshake> {
        self.connect_with(guest, schema, self.options.clone())
    }

    /// Starts listening for `guest`. Fails right away if the guest cannot be
    /// reached; otherwise the returned [`Handshake`] resolves when the guest
    /// acknowledges.
    pub fn connect_with(&self, guest: impl Into<GuestTarget>, mut schema: Schema, options: HostOptions) -> Result<Handshake> {
        let guest = guest.into();
        let link = guest.link()?;
        let accept = Arc::new(Accept {
            connection_id: ConnectionId::generate(options.calls.effective_id_length()),
            methods: extract_methods(&mut schema),
            schema,
            link: link.clone(),
            owned: guest.is_owned(),
            options,
            registry: self.registry.clone(),
            disposer: Arc::new(Disposer::new()),
        });

        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Mutex::new(Some(tx)));

        let on_request = {
            let accept = accept.clone();
            let pending = pending.clone();
            link.subscribe(move |message, _| {
                let Message::HandshakeRequest(request) = message else { return };
                if accept.registry.contains(&accept.connection_id) {
                    debug!(connection = %accept.connection_id, "duplicate handshake request ignored");
                    return;
                }
                if let Err(e) = accept.accept(request) {
                    warn!(connection = %accept.connection_id, error = %e, "handshake failed");
                    if let Some(tx) = pending.lock().take() {
                        let _ = tx.send(Err(Error::Transport(e)));
                    }
                }
            })?
        };
        accept.disposer.add(on_request);

        let on_ack = {
            let accept = accept.clone();
            link.subscribe(move |message, _| {
                let Message::HandshakeReply(reply) = message else { return };
                if reply.connection_id != accept.connection_id || !reply.is_ack() {
                    return;
                }
                let Some(connection) = accept.registry.get(&accept.connection_id) else { return };
                if let Some(tx) = pending.lock().take() {
                    debug!(connection = %accept.connection_id, "host connected");
                    let _ = tx.send(Ok(connection));
                }
            })
        };
        match on_ack {
            Ok(subscription) => accept.disposer.add(subscription),
            Err(e) => {
                accept.disposer.dispose();
                return Err(e.into());
            }
        }

        Ok(Handshake::new(rx, Some(accept.connection_id.clone())))
    }
}

/// Everything one connect needs to answer the guest's request.
struct Accept {
    connection_id: ConnectionId,
    methods: MethodMap,
    schema: Schema,
    link: Link,
    owned: bool,
    options: HostOptions,
    registry: Registry,
    disposer: Arc<Disposer>,
}

impl Accept {
    fn accept(&self, request: HandshakeRequest) -> transport::Result<()> {
        let id = &self.connection_id;
        let remote = register_remote_methods(
            request.schema,
            &request.method_names,
            id.clone(),
            &self.link,
            self.options.calls,
            &self.disposer,
        )?;
        register_local_methods(self.methods.clone(), id.clone(), &self.link, remote.clone(), &self.disposer)?;

        let registry = self.registry.clone();
        let key = id.clone();
        self.disposer.defer(move || {
            registry.remove(&key);
        });
        if self.owned {
            let link = self.link.clone();
            self.disposer.defer(move || link.terminate());
        }

        self.registry
            .insert(Connection::new(id.clone(), remote, self.disposer.clone()));

        let reply = Message::HandshakeReply(HandshakeReply {
            connection_id: id.clone(),
            method_names: Some(self.methods.names()),
            schema: Some(self.schema.to_value()),
        });
        self.link.post(&reply, Vec::new())?;
        debug!(connection = %id, kind = %self.link.kind(), "handshake request accepted");
        Ok(())
    }
}
