//! # Schema & Method Extraction
//!
//! A schema is what one side exposes: a tree of plain values and methods.
//! Methods cannot cross the boundary, so before a handshake they are pulled
//! out into a [`MethodMap`] keyed by dotted path (`user.profile.get`), and
//! only the remaining values are sent.
//!
//! ## Invariants
//!
//! - After [`extract_methods`], no `Schema::Method` is reachable from the
//!   schema.
//! - Removing a method never shifts a list: the slot becomes `null`, so
//!   `items.1` still names the second element on the other side.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::Args;
use crate::rpc::Context;
use crate::transfer::Payload;

type Handler = dyn Fn(Args, Context) -> BoxFuture<'static, anyhow::Result<Payload>> + Send + Sync;

/// A locally exposed async function.
///
/// Handlers receive the call arguments and a [`Context`] holding the live
/// remote of the connection, so a handler may call back into the peer.
#[derive(Clone)]
pub struct Method {
    handler: Arc<Handler>,
}

impl Method {
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Args, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Payload> + 'static,
    {
        let handler: Arc<Handler> = Arc::new(move |args: Args, ctx: Context| {
            f(args, ctx).map(|r| r.map(Into::<Payload>::into)).boxed()
        });
        Self { handler }
    }

    /// A method with typed arguments and result.
    ///
    /// Arguments are decoded from the argument list as `A` (use a tuple for
    /// several arguments). A decode failure or a result that fails to
    /// serialize is reported to the caller as a rejection.
    pub fn typed<F, Fut, A, R>(f: F) -> Self
    where
        F: Fn(A, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |args: Args, ctx| {
            let f = f.clone();
            async move {
                let args: A = args.parse()?;
                let result = f(args, ctx).await?;
                anyhow::Ok(serde_json::to_value(result)?)
            }
        })
    }

    pub(crate) fn call(&self, args: Args, ctx: Context) -> BoxFuture<'static, anyhow::Result<Payload>> {
        (self.handler)(args, ctx)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Method(..)")
    }
}

/// The tree one side exposes to its peer.
#[derive(Clone, Debug)]
pub enum Schema {
    /// An opaque leaf. Sent as-is, never descended into.
    Value(Value),
    Method(Method),
    Map(BTreeMap<String, Schema>),
    List(Vec<Schema>),
}

impl Default for Schema {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

impl Schema {
    pub fn map() -> Self {
        Self::default()
    }

    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    /// Inserts `node` under `key`.
    ///
    /// Only a map can hold keys: called on a value, method or list, the
    /// existing node is discarded and replaced by a map holding just `node`.
    pub fn with(mut self, key: impl Into<String>, node: impl Into<Schema>) -> Self {
        if !matches!(self, Self::Map(_)) {
            self = Self::map();
        }
        if let Self::Map(entries) = &mut self {
            entries.insert(key.into(), node.into());
        }
        self
    }

    /// Appends `node`.
    ///
    /// Called on anything but a list, the existing node is discarded and
    /// replaced by a list holding just `node`.
    pub fn push(mut self, node: impl Into<Schema>) -> Self {
        if !matches!(self, Self::List(_)) {
            self = Self::list();
        }
        if let Self::List(items) = &mut self {
            items.push(node.into());
        }
        self
    }

    /// The serializable projection: methods under maps are dropped, methods
    /// inside lists become `null`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Method(_) => Value::Null,
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .filter(|(_, node)| !matches!(node, Self::Method(_)))
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect(),
            ),
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    /// True if any method is still reachable from this node.
    pub fn has_methods(&self) -> bool {
        match self {
            Self::Value(_) => false,
            Self::Method(_) => true,
            Self::Map(entries) => entries.values().any(Self::has_methods),
            Self::List(items) => items.iter().any(Self::has_methods),
        }
    }
}

impl From<Value> for Schema {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Method> for Schema {
    fn from(method: Method) -> Self {
        Self::Method(method)
    }
}

/// Methods keyed by dotted path. Built once per connect; a live connection
/// keeps its own copy.
#[derive(Clone, Debug, Default)]
pub struct MethodMap {
    methods: BTreeMap<String, Method>,
}

impl MethodMap {
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Method)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert(&mut self, name: impl Into<String>, method: Method) {
        self.methods.insert(name.into(), method);
    }
}

/// Moves every method out of `schema` into a map keyed by dotted path.
///
/// Only maps and lists are descended; values are opaque leaves. Always
/// succeeds; an empty schema yields an empty map.
pub fn extract_methods(schema: &mut Schema) -> MethodMap {
    let mut methods = MethodMap::default();
    let mut path = Vec::new();
    extract(schema, &mut path, &mut methods);
    methods
}

fn extract(node: &mut Schema, path: &mut Vec<String>, out: &mut MethodMap) {
    match node {
        Schema::Map(entries) => {
            for (key, mut child) in std::mem::take(entries) {
                path.push(key.clone());
                match child {
                    Schema::Method(method) => out.insert(path.join("."), method),
                    _ => {
                        extract(&mut child, path, out);
                        entries.insert(key, child);
                    }
                }
                path.pop();
            }
        }
        Schema::List(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                path.push(index.to_string());
                if matches!(item, Schema::Method(_)) {
                    if let Schema::Method(method) = std::mem::replace(item, Schema::Value(Value::Null)) {
                        out.insert(path.join("."), method);
                    }
                } else {
                    extract(item, path, out);
                }
                path.pop();
            }
        }
        // the root itself has no path to be called by
        Schema::Value(_) | Schema::Method(_) => {}
    }
}
