//! # Transport Abstraction
//!
//! The only thing the rest of the crate knows about a target: it can be
//! posted to, and it may be listened on.
//!
//! ## Philosophy
//!
//! - **Shape-Agnostic**: Windows and in-page workers wrap payloads in an
//!   event with origin and source; worker threads hand over the bare value.
//!   [`Delivery`] normalizes both.
//! - **Clone Semantics**: Payloads are `serde_json::Value`, so nothing that
//!   cannot be structurally cloned is ever posted. Transferred buffers ride
//!   next to the value, never inside it.

use std::sync::Arc;

use serde_json::Value;

/// The environment shape behind an endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A browsing context: a page, or the document inside a frame.
    Window,
    /// An in-page worker, or the worker's own global scope.
    Worker,
    /// A worker thread, or the thread's port to its parent.
    Thread,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Window => write!(f, "window"),
            Self::Worker => write!(f, "worker"),
            Self::Thread => write!(f, "thread"),
        }
    }
}

/// Strong type for browsing context identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Strong type for listener registrations on an endpoint.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Errors raised while resolving or using a target.
#[derive(Debug)]
pub enum Error {
    /// Nothing to send to: no parent context, or a frame that is not attached.
    NoTarget(String),
    /// The endpoint supports none of the subscription shapes.
    UnsupportedTarget(TargetKind),
    /// The target was terminated; it neither sends nor receives.
    Terminated,
    /// Listening needs a Tokio runtime to pump deliveries.
    NoRuntime,
    /// The message could not be encoded.
    Encode(anchorpc::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTarget(why) => write!(f, "No target to send to: {}", why),
            Self::UnsupportedTarget(kind) => write!(f, "Unsupported target: cannot listen on this {}", kind),
            Self::Terminated => write!(f, "Target has been terminated"),
            Self::NoRuntime => write!(f, "Listening requires a running Tokio runtime"),
            Self::Encode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<anchorpc::Error> for Error {
    fn from(e: anchorpc::Error) -> Self {
        Self::Encode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a message is posted.
#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    /// For windows: the origin the receiver must have, or `*` for any.
    pub target_origin: Option<String>,
    /// Buffers moved along with the message.
    pub transfer: Vec<Vec<u8>>,
}

impl PostOptions {
    pub fn to_origin(origin: impl Into<String>) -> Self {
        Self {
            target_origin: Some(origin.into()),
            transfer: Vec::new(),
        }
    }

    pub fn with_transfer(mut self, transfer: Vec<Vec<u8>>) -> Self {
        self.transfer = transfer;
        self
    }
}

/// A message as windows and in-page workers deliver it.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Value,
    /// The sender's origin. Workers leave this empty.
    pub origin: Option<String>,
    /// The sending browsing context. Workers leave this empty.
    pub source: Option<WindowId>,
    pub transfer: Vec<Vec<u8>>,
}

/// One received message, in whichever shape the environment uses.
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(MessageEvent),
    /// Worker threads hand over the posted value directly.
    Raw { data: Value, transfer: Vec<Vec<u8>> },
}

impl Delivery {
    /// The payload, whether or not it arrived wrapped in an event.
    pub fn data(&self) -> &Value {
        match self {
            Self::Event(event) => &event.data,
            Self::Raw { data, .. } => data,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Event(event) => event.origin.as_deref(),
            Self::Raw { .. } => None,
        }
    }

    pub fn source(&self) -> Option<WindowId> {
        match self {
            Self::Event(event) => event.source,
            Self::Raw { .. } => None,
        }
    }

    pub fn transfer(&self) -> &[Vec<u8>] {
        match self {
            Self::Event(event) => &event.transfer,
            Self::Raw { transfer, .. } => transfer,
        }
    }
}

pub type Listener = Arc<dyn Fn(&Delivery) + Send + Sync>;

/// Something messages can be posted to, and possibly listened on.
///
/// This trait is object-safe (`Arc<dyn Endpoint>`).
///
/// # Invariants
/// - `post_message` never blocks; delivery is asynchronous.
/// - Listeners run one delivery at a time, in the order messages were posted
///   by any single sender.
/// - `remove_listener` is a no-op for unknown ids.
pub trait Endpoint: Send + Sync + 'static {
    fn kind(&self) -> TargetKind;

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()>;

    /// Post-only endpoints keep the default and report themselves unsupported.
    fn add_listener(&self, _listener: Listener) -> Result<ListenerId> {
        Err(Error::UnsupportedTarget(self.kind()))
    }

    fn remove_listener(&self, _id: ListenerId) {}

    /// Stops the peer behind this endpoint, if this side owns it.
    fn terminate(&self) {}
}

impl<E: Endpoint + ?Sized> Endpoint for Arc<E> {
    fn kind(&self) -> TargetKind {
        (**self).kind()
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        (**self).post_message(message, options)
    }

    fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        (**self).add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        (**self).remove_listener(id)
    }

    fn terminate(&self) {
        (**self).terminate()
    }
}
