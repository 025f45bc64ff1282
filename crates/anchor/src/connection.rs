//! # Connections & Registry
//!
//! A [`Connection`] is what a finished handshake hands to application code:
//! the shared id, the peer's [`Remote`], and `close`. The host keeps every
//! live connection in a [`Registry`] so replies from many guests can be told
//! apart.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;

use anchorpc::ConnectionId;

use crate::link::Disposer;
use crate::rpc::Remote;

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    remote: Remote,
    disposer: Arc<Disposer>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, remote: Remote, disposer: Arc<Disposer>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                remote,
                disposer,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    pub fn remote(&self) -> &Remote {
        &self.inner.remote
    }

    /// Removes every listener this connection installed and, on the host,
    /// drops it from the registry and terminates an owned guest. Calls still
    /// waiting for a reply are left pending; new calls fail with
    /// [`crate::rpc::Error::Closed`].
    ///
    /// Closing twice does nothing the second time.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.disposer.dispose();
        debug!(connection = %self.inner.id, "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Live connections by id. Cloning shares the table.
#[derive(Clone, Default)]
pub struct Registry {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Connection) {
        self.connections.insert(connection.id().clone(), connection);
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }
}
