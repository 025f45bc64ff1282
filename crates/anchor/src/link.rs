//! # Links
//!
//! A [`Link`] is one side's view of the channel to its peer: the endpoint it
//! listens on, the endpoint it posts to, the origin it addresses, and the
//! [`Trust`] rule deciding which deliveries are believed.
//!
//! For a worker or thread both endpoints are the same object. For a frame
//! the host listens on its own window and posts through a proxy of the
//! frame's content window, and vice versa for the guest.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use anchorpc::Message;

use crate::transport::Delivery;
use crate::transport::Endpoint;
use crate::transport::ListenerId;
use crate::transport::PostOptions;
use crate::transport::Result;
use crate::transport::TargetKind;
use crate::transport::WindowId;

/// Which deliveries a side accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trust {
    /// Workers and threads: only the peer can post to us.
    Any,
    /// A host listening for its frame: the event must come from the frame's
    /// content window, and from the frame's origin when one is known.
    Window {
        origin: Option<String>,
        source: WindowId,
    },
    /// A guest window listening for its host: the event must come from the
    /// parent context.
    Source(WindowId),
}

impl Trust {
    pub fn admits(&self, delivery: &Delivery) -> bool {
        match self {
            Self::Any => true,
            Self::Window { origin, source } => {
                let origin_ok = match origin {
                    Some(origin) => delivery.origin() == Some(origin.as_str()),
                    None => true,
                };
                origin_ok && delivery.source() == Some(*source)
            }
            Self::Source(source) => delivery.source() == Some(*source),
        }
    }
}

#[derive(Clone)]
pub struct Link {
    listen: Arc<dyn Endpoint>,
    send: Arc<dyn Endpoint>,
    target_origin: Option<String>,
    trust: Trust,
}

impl Link {
    /// A link that trusts every delivery and addresses no particular origin.
    pub fn new(listen: Arc<dyn Endpoint>, send: Arc<dyn Endpoint>) -> Self {
        Self {
            listen,
            send,
            target_origin: None,
            trust: Trust::Any,
        }
    }

    /// Listens and posts on the same endpoint.
    pub fn duplex(endpoint: Arc<dyn Endpoint>) -> Self {
        Self::new(endpoint.clone(), endpoint)
    }

    pub fn with_trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = Some(origin.into());
        self
    }

    pub fn kind(&self) -> TargetKind {
        self.send.kind()
    }

    pub fn trust(&self) -> &Trust {
        &self.trust
    }

    pub fn target_origin(&self) -> Option<&str> {
        self.target_origin.as_deref()
    }

    pub fn post(&self, message: &Message, transfer: Vec<Vec<u8>>) -> Result<()> {
        let value = message.to_value()?;
        let options = PostOptions {
            target_origin: self.target_origin.clone(),
            transfer,
        };
        self.send.post_message(value, options)
    }

    /// Installs a listener that sees only trusted deliveries that parse as
    /// protocol messages. Everything else is dropped silently.
    pub fn subscribe<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(Message, &Delivery) + Send + Sync + 'static,
    {
        let trust = self.trust.clone();
        let id = self.listen.add_listener(Arc::new(move |delivery: &Delivery| {
            if !trust.admits(delivery) {
                trace!(origin = ?delivery.origin(), source = ?delivery.source(), "untrusted delivery dropped");
                return;
            }
            match Message::from_value(delivery.data()) {
                Ok(message) => handler(message, delivery),
                Err(_) => trace!("foreign message ignored"),
            }
        }))?;
        Ok(Subscription {
            endpoint: self.listen.clone(),
            id,
        })
    }

    /// Terminates the peer, if the sending endpoint owns it.
    pub fn terminate(&self) {
        self.send.terminate()
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("kind", &self.kind())
            .field("target_origin", &self.target_origin)
            .field("trust", &self.trust)
            .finish()
    }
}

/// A listener installed through [`Link::subscribe`].
pub struct Subscription {
    endpoint: Arc<dyn Endpoint>,
    id: ListenerId,
}

impl Subscription {
    pub fn cancel(self) {
        self.endpoint.remove_listener(self.id)
    }
}

/// Teardown actions collected while a connection is built, run once on
/// close in the order they were added.
#[derive(Default)]
pub struct Disposer {
    actions: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Disposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Subscription) {
        self.defer(move || subscription.cancel());
    }

    pub fn defer(&self, action: impl FnOnce() + Send + 'static) {
        self.actions.lock().push(Box::new(action));
    }

    /// Runs and forgets every action. Actions run outside the lock, so they
    /// may add more; those run on the next call.
    pub fn dispose(&self) {
        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions {
            action();
        }
    }

    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
