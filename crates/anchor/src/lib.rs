//! # Anchor
//!
//! Bidirectional RPC between two isolated contexts that can only exchange
//! cloneable messages: a host and the guest it embeds (a frame, an in-page
//! worker, or a worker thread).
//!
//! ## Architecture
//!
//! - **Schema**: each side describes what it exposes as a tree of values and
//!   methods. Methods are extracted into a flat [`MethodMap`]; only the
//!   values cross the boundary.
//! - **Transport**: [`Endpoint`] abstracts over where messages go and where
//!   they are heard. A [`Link`] pairs a listening and a sending endpoint with
//!   the rule deciding which senders are trusted.
//! - **RPC**: `register_local_methods` answers requests for local methods;
//!   `register_remote_methods` builds a [`Remote`] whose stubs send requests
//!   and correlate replies by call id.
//! - **Handshake**: [`Host`] and [`Guest`] exchange schemas and agree on a
//!   connection id. Both sides wire their stubs and handlers before either
//!   resolves its [`Connection`].

pub mod connection;
pub mod environment;
pub mod guest;
pub mod handshake;
pub mod host;
pub mod link;
mod mailbox;
pub mod options;
pub mod rpc;
pub mod schema;
pub mod transfer;
pub mod transport;
pub mod window;
pub mod worker;


pub use anchorpc::ConnectionId;
pub use anchorpc::RemoteError;

pub use connection::Connection;
pub use connection::Registry;
pub use environment::Environment;
pub use guest::Guest;
pub use handshake::Handshake;
pub use host::GuestTarget;
pub use host::Host;
pub use link::Link;
pub use link::Trust;
pub use options::CallSettings;
pub use options::ConnectionSetup;
pub use options::GuestOptions;
pub use options::HostOptions;
pub use options::MIN_ID_LENGTH;
pub use rpc::Args;
pub use rpc::Context;
pub use rpc::Remote;
pub use rpc::RemoteNode;
pub use rpc::Stub;
pub use schema::Method;
pub use schema::MethodMap;
pub use schema::Schema;
pub use schema::extract_methods;
pub use transfer::Payload;
pub use transfer::Transfer;
pub use transfer::with_transferable;
pub use transport::Delivery;
pub use transport::Endpoint;
pub use transport::TargetKind;
pub use window::Frame;
pub use window::Window;
pub use window::origin_of;
pub use worker::ParentPort;
pub use worker::Thread;
pub use worker::ThreadHandle;
pub use worker::Worker;
pub use worker::WorkerHandle;
pub use worker::WorkerScope;
