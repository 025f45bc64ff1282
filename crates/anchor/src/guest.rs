//! # Guest
//!
//! The side that only knows how to reach its container. `connect` posts a
//! `HANDSHAKE_REQUEST` with its schema, wires both directions of calls when
//! the host replies, runs the optional setup hook, then acknowledges.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use anchorpc::HandshakeReply;
use anchorpc::HandshakeRequest;
use anchorpc::Message;

use crate::connection::Connection;
use crate::environment::Environment;
use crate::handshake::Error;
use crate::handshake::Handshake;
use crate::handshake::Result;
use crate::link::Disposer;
use crate::link::Link;
use crate::options::GuestOptions;
use crate::rpc::register_local_methods;
use crate::rpc::register_remote_methods;
use crate::schema::MethodMap;
use crate::schema::Schema;
use crate::schema::extract_methods;

type Pending = (oneshot::Sender<Result<Connection>>, MethodMap);

pub struct Guest;

impl Guest {
    pub fn connect(env: &Environment, schema: Schema) -> Result<Handshake> {
        Self::connect_with(env, schema, GuestOptions::default())
    }

    /// Sends the handshake request to the host found in `env`, or to
    /// `options.host_target` when set. Fails right away if there is no host
    /// to talk to.
    pub fn connect_with(env: &Environment, mut schema: Schema, options: GuestOptions) -> Result<Handshake> {
        let link = match &options.host_target {
            Some(endpoint) => Link::duplex(endpoint.clone()),
            None => env.host_link()?,
        };

        let methods = extract_methods(&mut schema);
        let request = Message::HandshakeRequest(HandshakeRequest {
            method_names: methods.names(),
            schema: schema.to_value(),
        });

        let (tx, rx) = oneshot::channel();
        let pending: Arc<Mutex<Option<Pending>>> = Arc::new(Mutex::new(Some((tx, methods))));
        let disposer = Arc::new(Disposer::new());

        let subscription = {
            let link = link.clone();
            let disposer = disposer.clone();
            link.clone().subscribe(move |message, delivery| {
                let Message::HandshakeReply(reply) = message else { return };
                if reply.is_ack() {
                    return;
                }
                let Some((tx, methods)) = pending.lock().take() else {
                    trace!(connection = %reply.connection_id, "later handshake reply ignored");
                    return;
                };
                let link = match delivery.origin() {
                    Some(origin) => link.clone().with_target_origin(origin),
                    None => link.clone(),
                };
                tokio::spawn(complete(reply, methods, link, options.clone(), disposer.clone(), tx));
            })?
        };
        disposer.add(subscription);

        if let Err(e) = link.post(&request, Vec::new()) {
            disposer.dispose();
            return Err(e.into());
        }
        Ok(Handshake::new(rx, None))
    }
}

async fn complete(
    reply: HandshakeReply,
    methods: MethodMap,
    link: Link,
    options: GuestOptions,
    disposer: Arc<Disposer>,
    tx: oneshot::Sender<Result<Connection>>,
) {
    let outcome = finish(reply, methods, &link, &options, &disposer).await;
    if let Err(e) = &outcome {
        debug!(error = %e, "guest handshake failed");
        disposer.dispose();
    }
    let _ = tx.send(outcome);
}

async fn finish(
    reply: HandshakeReply,
    methods: MethodMap,
    link: &Link,
    options: &GuestOptions,
    disposer: &Arc<Disposer>,
) -> Result<Connection> {
    let id = reply.connection_id;
    let remote = register_remote_methods(
        reply.schema.unwrap_or_default(),
        &reply.method_names.unwrap_or_default(),
        id.clone(),
        link,
        options.calls,
        disposer,
    )?;
    register_local_methods(methods, id.clone(), link, remote.clone(), disposer)?;

    if let Some(setup) = &options.on_connection_setup {
        setup.setup(remote.clone()).await.map_err(Error::Setup)?;
    }

    link.post(&Message::HandshakeReply(HandshakeReply::ack(id.clone())), Vec::new())?;
    debug!(connection = %id, kind = %link.kind(), "guest connected");
    Ok(Connection::new(id, remote, disposer.clone()))
}
