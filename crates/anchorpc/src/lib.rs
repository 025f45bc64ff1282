//! # AnchoRPC
//!
//! The wire protocol spoken between a host and a guest.
//!
//! ## Philosophy
//!
//! - **Self-Describing**: Every message names its action and carries the
//!   connection id, call id and method name it belongs to. A receiver that is
//!   not the intended recipient can always tell, and ignore it.
//! - **Clone-Safe**: Payloads are `serde_json::Value`. Nothing that cannot be
//!   structurally cloned (functions, live handles) is representable.
//! - **No Transport**: This crate encodes and decodes. Moving messages around
//!   is the runtime's business.

mod error;
mod id;
mod message;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use error::RemoteError;
pub use error::Result;
pub use id::generate_id;
pub use id::CallId;
pub use id::ConnectionId;
pub use id::DEFAULT_ID_LENGTH;
pub use message::action;
pub use message::HandshakeReply;
pub use message::HandshakeRequest;
pub use message::Message;
pub use message::RpcRequest;
pub use message::RpcResponse;
