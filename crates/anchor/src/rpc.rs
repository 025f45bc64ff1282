//! # RPC Engine
//!
//! Both directions of a connection's calls.
//!
//! - **Expose** ([`register_local_methods`]): one listener answers
//!   `RPC_REQUEST`s for local methods, each on its own task, and posts
//!   `RPC_RESOLVE` or `RPC_REJECT` tagged with the request's call id.
//! - **Bind** ([`register_remote_methods`]): builds a [`Remote`] mirroring
//!   the peer's schema with a [`Stub`] at every method path. One listener
//!   settles replies through a table of pending calls keyed by call id.
//!
//! ## Invariants
//!
//! - A reply settles a call only if action, connection id, call id and
//!   method name all match. Anything else belongs to someone else and is
//!   ignored.
//! - Calls are independent: replies may arrive in any order.
//! - A handler's failure, including a panic, is always answered with a
//!   rejection; the listener itself never fails.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;
use tracing::warn;

use anchorpc::CallId;
use anchorpc::ConnectionId;
use anchorpc::Message;
use anchorpc::RemoteError;
use anchorpc::RpcRequest;
use anchorpc::RpcResponse;

use crate::link::Disposer;
use crate::link::Link;
use crate::options::CallSettings;
use crate::schema::MethodMap;
use crate::transfer::Payload;
use crate::transfer::marker_index;
use crate::transport;

/// List indices above this are treated as map keys when placing stubs.
const MAX_INDEX: usize = 1 << 16;

/// Fresh ids tried before a call gives up on finding a free one.
const MAX_ID_ATTEMPTS: usize = 16;

#[derive(Debug)]
pub enum Error {
    /// The peer's method failed; carries its serialized error.
    Remote(RemoteError),
    /// The connection was closed before the call was made.
    Closed,
    /// No reply within the configured call timeout.
    Timeout,
    /// Arguments or result did not convert to or from the cloneable subset.
    Serialize(serde_json::Error),
    Transport(transport::Error),
    /// The peer exposes no method at this path.
    MethodNotFound(String),
    /// Every generated call id was already taken by a pending call.
    IdsExhausted,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "{}", e),
            Self::Closed => write!(f, "Connection is closed"),
            Self::Timeout => write!(f, "Call timed out"),
            Self::Serialize(e) => write!(f, "Serialization error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::MethodNotFound(name) => write!(f, "No remote method named '{}'", name),
            Self::IdsExhausted => write!(f, "No free call id after {} attempts", MAX_ID_ATTEMPTS),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Serialize(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Arguments of an incoming call, with any buffers transferred alongside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<Value>,
    buffers: Vec<Vec<u8>>,
}

impl Args {
    pub fn new(values: Vec<Value>, buffers: Vec<Vec<u8>>) -> Self {
        Self { values, buffers }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }

    /// Decodes the argument list as `A`.
    ///
    /// The whole list is tried first, so tuples and sequences work. A single
    /// argument may also decode on its own, and no arguments decode as `()`.
    pub fn parse<A: DeserializeOwned>(&self) -> serde_json::Result<A> {
        let whole = serde_json::from_value(Value::Array(self.values.clone()));
        match self.values.as_slice() {
            [] => whole.or_else(|_| serde_json::from_value(Value::Null)),
            [single] => whole.or_else(|_| serde_json::from_value(single.clone())),
            _ => whole,
        }
    }

    /// Resolves a transfer marker found in one of the arguments.
    pub fn buffer(&self, marker: &Value) -> Option<&[u8]> {
        marker_index(marker).and_then(|i| self.buffers.get(i)).map(Vec::as_slice)
    }

    pub fn take_buffer(&mut self, marker: &Value) -> Option<Vec<u8>> {
        marker_index(marker)
            .and_then(|i| self.buffers.get_mut(i))
            .map(std::mem::take)
    }
}

/// Handed to every local handler: the live view of the peer that made the
/// call, so a handler can call back.
#[derive(Clone, Debug)]
pub struct Context {
    remote: Remote,
}

impl Context {
    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.remote.connection_id()
    }
}

/// Response data correlating to a request.
struct PendingCall {
    method: String,
    tx: oneshot::Sender<std::result::Result<Payload, RemoteError>>,
}

/// The calling half of a connection, shared by all of its stubs.
struct Caller {
    connection_id: ConnectionId,
    link: Link,
    pending: DashMap<CallId, PendingCall>,
    closed: AtomicBool,
    settings: CallSettings,
}

impl Caller {
    async fn call(&self, method: &str, args: Vec<Value>, buffers: Vec<Vec<u8>>) -> Result<Payload> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let mut attempts = 1;
        let call_id = loop {
            let id = CallId::generate(self.settings.effective_id_length());
            match self.pending.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(PendingCall {
                        method: method.to_string(),
                        tx,
                    });
                    break id;
                }
                Entry::Occupied(_) if attempts < MAX_ID_ATTEMPTS => attempts += 1,
                Entry::Occupied(_) => return Err(Error::IdsExhausted),
            }
        };

        let request = Message::RpcRequest(RpcRequest {
            connection_id: self.connection_id.clone(),
            call_id: call_id.clone(),
            call_name: method.to_string(),
            args,
        });
        if let Err(e) = self.link.post(&request, buffers) {
            self.pending.remove(&call_id);
            return Err(e.into());
        }
        trace!(connection = %self.connection_id, call = %call_id, method, "call sent");

        let outcome = match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(&call_id);
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(Error::Remote(e)),
            Err(_) => Err(Error::Closed),
        }
    }

    fn settle(&self, response: RpcResponse, resolved: bool, transfer: &[Vec<u8>]) {
        if response.connection_id != self.connection_id {
            return;
        }
        let Some((_, call)) = self
            .pending
            .remove_if(&response.call_id, |_, call| call.method == response.call_name)
        else {
            trace!(call = %response.call_id, "reply for unknown call ignored");
            return;
        };
        let outcome = response.into_outcome(resolved).map(|value| Payload {
            value,
            buffers: transfer.to_vec(),
        });
        let _ = call.tx.send(outcome);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A peer method. Calling it performs one round trip.
#[derive(Clone)]
pub struct Stub {
    name: String,
    caller: Arc<Caller>,
}

impl Stub {
    /// The dotted path the peer registered this method under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let payload = self.caller.call(&self.name, args, Vec::new()).await?;
        Ok(payload.value)
    }

    /// Calls with transferred buffers. An array value is the argument list;
    /// any other value is the single argument.
    pub async fn call_with(&self, payload: Payload) -> Result<Payload> {
        let args = match payload.value {
            Value::Array(args) => args,
            single => vec![single],
        };
        self.caller.call(&self.name, args, payload.buffers).await
    }

    /// Typed call. `args` serializes to the argument list: a tuple for
    /// several arguments, `()` for none, anything else for one.
    ///
    /// Anything that serializes to an array is spread, and anything that
    /// serializes to `null` sends no arguments. Pass a single collection or
    /// `Option` as a 1-tuple: `invoke("sum", (vec![1, 2, 3],))`.
    pub async fn invoke<A, R>(&self, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = match serde_json::to_value(args)? {
            Value::Array(args) => args,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        let result = self.call(args).await?;
        Ok(serde_json::from_value(result)?)
    }
}

impl std::fmt::Debug for Stub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Stub").field(&self.name).finish()
    }
}

/// The peer's schema with stubs in place of its methods.
#[derive(Clone, Debug)]
pub enum RemoteNode {
    Value(Value),
    Stub(Stub),
    Map(BTreeMap<String, RemoteNode>),
    List(Vec<RemoteNode>),
}

impl RemoteNode {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(entries) => Self::Map(entries.into_iter().map(|(k, v)| (k, Self::from_value(v))).collect()),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_value).collect()),
            other => Self::Value(other),
        }
    }

    /// One step down: a map key, or a list index.
    pub fn get(&self, key: &str) -> Option<&RemoteNode> {
        match self {
            Self::Map(entries) => entries.get(key),
            Self::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Follows a dotted path. The empty path is this node.
    pub fn lookup(&self, path: &str) -> Option<&RemoteNode> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |node, key| node.get(key))
    }

    pub fn as_stub(&self) -> Option<&Stub> {
        match self {
            Self::Stub(stub) => Some(stub),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The plain data: stubs under maps are dropped, stubs in lists are
    /// `null`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Stub(_) => Value::Null,
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .filter(|(_, node)| !matches!(node, Self::Stub(_)))
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect(),
            ),
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    /// Puts `stub` at `path`, creating containers on the way. A numeric
    /// segment creates a list, anything else a map; a list reached by a
    /// non-numeric segment becomes a map keyed by index.
    fn place(&mut self, path: &[&str], stub: Stub) {
        let Some((head, rest)) = path.split_first() else {
            *self = Self::Stub(stub);
            return;
        };
        let index = head.parse::<usize>().ok().filter(|i| *i < MAX_INDEX);

        let is_list = matches!(self, Self::List(_));
        let is_map = matches!(self, Self::Map(_));
        if is_list && index.is_none() {
            if let Self::List(items) = std::mem::replace(self, Self::Map(BTreeMap::new())) {
                if let Self::Map(entries) = self {
                    entries.extend(items.into_iter().enumerate().map(|(i, item)| (i.to_string(), item)));
                }
            }
        } else if !is_list && !is_map {
            *self = match index {
                Some(_) => Self::List(Vec::new()),
                None => Self::Map(BTreeMap::new()),
            };
        }

        match (self, index) {
            (Self::List(items), Some(i)) => {
                if items.len() <= i {
                    items.resize_with(i + 1, || Self::Value(Value::Null));
                }
                items[i].place(rest, stub);
            }
            (Self::Map(entries), _) => entries
                .entry(head.to_string())
                .or_insert(Self::Value(Value::Null))
                .place(rest, stub),
            _ => {}
        }
    }
}

/// The peer as seen from this side of a connection.
#[derive(Clone)]
pub struct Remote {
    root: Arc<RemoteNode>,
    names: Arc<Vec<String>>,
    caller: Arc<Caller>,
}

impl Remote {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.caller.connection_id
    }

    pub fn root(&self) -> &RemoteNode {
        &self.root
    }

    /// The node at a dotted path: a plain value, a stub, or a subtree.
    pub fn get(&self, path: &str) -> Option<&RemoteNode> {
        self.root.lookup(path)
    }

    pub fn stub(&self, path: &str) -> Result<Stub> {
        self.get(path)
            .and_then(RemoteNode::as_stub)
            .cloned()
            .ok_or_else(|| Error::MethodNotFound(path.to_string()))
    }

    /// Calls the method at `path`: `remote.call("user.profile.get", vec![])`.
    pub async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value> {
        self.stub(path)?.call(args).await
    }

    /// Typed call of the method at `path`. `args` follows [`Stub::invoke`]:
    /// wrap a single array or `Option` argument in a 1-tuple.
    pub async fn invoke<A, R>(&self, path: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.stub(path)?.invoke(args).await
    }

    pub fn method_names(&self) -> &[String] {
        &self.names
    }

    pub fn to_value(&self) -> Value {
        self.root.to_value()
    }

    /// True once the owning connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.caller.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("connection_id", self.connection_id())
            .field("methods", &self.names)
            .finish()
    }
}

/// Builds the [`Remote`] for a peer that declared `schema` and
/// `method_names`, and installs the listener that settles its replies.
///
/// The listener and the remote's closed flag are handed to `disposer`.
pub fn register_remote_methods(
    schema: Value,
    method_names: &[String],
    connection_id: ConnectionId,
    link: &Link,
    settings: CallSettings,
    disposer: &Disposer,
) -> transport::Result<Remote> {
    let caller = Arc::new(Caller {
        connection_id,
        link: link.clone(),
        pending: DashMap::new(),
        closed: AtomicBool::new(false),
        settings,
    });

    let mut root = RemoteNode::from_value(schema);
    for name in method_names {
        let path: Vec<&str> = name.split('.').collect();
        root.place(
            &path,
            Stub {
                name: name.clone(),
                caller: caller.clone(),
            },
        );
    }

    let weak = Arc::downgrade(&caller);
    let subscription = link.subscribe(move |message, delivery| {
        let Some(caller) = weak.upgrade() else { return };
        match message {
            Message::RpcResolve(response) => caller.settle(response, true, delivery.transfer()),
            Message::RpcReject(response) => caller.settle(response, false, delivery.transfer()),
            _ => {}
        }
    })?;
    disposer.add(subscription);

    let closer = caller.clone();
    disposer.defer(move || closer.close());

    Ok(Remote {
        root: Arc::new(root),
        names: Arc::new(method_names.to_vec()),
        caller,
    })
}

/// Installs the listener that answers the peer's calls to `methods`.
///
/// Each request runs on its own task with a [`Context`] holding `remote`.
/// The listener is handed to `disposer`.
pub fn register_local_methods(
    methods: MethodMap,
    connection_id: ConnectionId,
    link: &Link,
    remote: Remote,
    disposer: &Disposer,
) -> transport::Result<()> {
    let methods = Arc::new(methods);
    let reply = link.clone();

    let subscription = link.subscribe(move |message, delivery| {
        let Message::RpcRequest(mut request) = message else { return };
        if request.connection_id != connection_id {
            return;
        }
        let Some(method) = methods.get(&request.call_name).cloned() else {
            trace!(method = %request.call_name, "request for unknown method ignored");
            return;
        };

        let args = Args::new(std::mem::take(&mut request.args), delivery.transfer().to_vec());
        let ctx = Context { remote: remote.clone() };
        let link = reply.clone();

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { method.call(args, ctx).await })
                .catch_unwind()
                .await;

            let (response, transfer) = match outcome {
                Ok(Ok(payload)) => (Message::resolve(&request, payload.value), payload.buffers),
                Ok(Err(e)) => {
                    warn!(method = %request.call_name, error = %e, "handler failed");
                    (Message::reject(&request, to_remote_error(&e)), Vec::new())
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!(method = %request.call_name, %reason, "handler panicked");
                    (Message::reject(&request, RemoteError::new(reason)), Vec::new())
                }
            };

            match link.post(&response, transfer) {
                Ok(()) => {}
                Err(transport::Error::Encode(e)) => {
                    let error = RemoteError::new(e.to_string());
                    if let Err(e) = link.post(&Message::reject(&request, error), Vec::new()) {
                        warn!(method = %request.call_name, error = %e, "failed to post rejection");
                    }
                }
                Err(e) => warn!(method = %request.call_name, error = %e, "failed to post reply"),
            }
        });
    })?;
    disposer.add(subscription);
    Ok(())
}

/// Serializes a handler error. A [`RemoteError`], bare or wrapped in
/// [`Error::Remote`], keeps its properties; anything else keeps its message.
pub fn to_remote_error(error: &anyhow::Error) -> RemoteError {
    if let Some(remote) = error.downcast_ref::<RemoteError>() {
        return remote.clone();
    }
    if let Some(Error::Remote(remote)) = error.downcast_ref::<Error>() {
        return remote.clone();
    }
    RemoteError::new(error.to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
