//! # Wire Messages
//!
//! | action | fields |
//! |---|---|
//! | `ANCHOR/HANDSHAKE_REQUEST` | `methodNames`, `schema` |
//! | `ANCHOR/HANDSHAKE_REPLY` | `connectionID`, `methodNames?`, `schema?` |
//! | `ANCHOR/RPC_REQUEST` | `connectionID`, `callID`, `callName`, `args` |
//! | `ANCHOR/RPC_RESOLVE` / `ANCHOR/RPC_REJECT` | `connectionID`, `callID`, `callName`, `result?`, `error?` |
//!
//! Resolve and reject share one body, [`RpcResponse`]; the action is the
//! discriminator.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::error::RemoteError;
use crate::error::Result;
use crate::id::CallId;
use crate::id::ConnectionId;

pub mod action {
    pub const HANDSHAKE_REQUEST: &str = "ANCHOR/HANDSHAKE_REQUEST";
    pub const HANDSHAKE_REPLY: &str = "ANCHOR/HANDSHAKE_REPLY";
    pub const RPC_REQUEST: &str = "ANCHOR/RPC_REQUEST";
    pub const RPC_RESOLVE: &str = "ANCHOR/RPC_RESOLVE";
    pub const RPC_REJECT: &str = "ANCHOR/RPC_REJECT";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Message {
    #[serde(rename = "ANCHOR/HANDSHAKE_REQUEST")]
    HandshakeRequest(HandshakeRequest),
    #[serde(rename = "ANCHOR/HANDSHAKE_REPLY")]
    HandshakeReply(HandshakeReply),
    #[serde(rename = "ANCHOR/RPC_REQUEST")]
    RpcRequest(RpcRequest),
    #[serde(rename = "ANCHOR/RPC_RESOLVE")]
    RpcResolve(RpcResponse),
    #[serde(rename = "ANCHOR/RPC_REJECT")]
    RpcReject(RpcResponse),
}

/// Sent by the guest to open a connection. It does not know the connection
/// id yet; the host assigns one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    #[serde(rename = "methodNames", default)]
    pub method_names: Vec<String>,
    #[serde(default)]
    pub schema: Value,
}

/// Sent by the host with its own schema, then echoed back by the guest as an
/// acknowledgement without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReply {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    #[serde(rename = "methodNames", default, skip_serializing_if = "Option::is_none")]
    pub method_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl HandshakeReply {
    /// The guest's acknowledgement: connection id only.
    pub fn ack(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            method_names: None,
            schema: None,
        }
    }

    /// An acknowledgement carries no schema and no method list.
    pub fn is_ack(&self) -> bool {
        self.method_names.is_none() && self.schema.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(rename = "callName")]
    pub call_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(rename = "callName")]
    pub call_name: String,
    /// `Some(Value::Null)` when the callee returned null, `None` when the
    /// field is absent.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

/// Keeps an explicit `null` distinct from a missing field.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// Builds the resolve reply for `request`, echoing its ids.
    pub fn resolve(request: &RpcRequest, result: Value) -> Self {
        Self::RpcResolve(RpcResponse {
            connection_id: request.connection_id.clone(),
            call_id: request.call_id.clone(),
            call_name: request.call_name.clone(),
            result: Some(result),
            error: None,
        })
    }

    /// Builds the reject reply for `request`, echoing its ids.
    pub fn reject(request: &RpcRequest, error: RemoteError) -> Self {
        Self::RpcReject(RpcResponse {
            connection_id: request.connection_id.clone(),
            call_id: request.call_id.clone(),
            call_name: request.call_name.clone(),
            result: None,
            error: Some(error),
        })
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::HandshakeRequest(_) => action::HANDSHAKE_REQUEST,
            Self::HandshakeReply(_) => action::HANDSHAKE_REPLY,
            Self::RpcRequest(_) => action::RPC_REQUEST,
            Self::RpcResolve(_) => action::RPC_RESOLVE,
            Self::RpcReject(_) => action::RPC_REJECT,
        }
    }

    /// The connection this message belongs to, if it has been assigned one.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            Self::HandshakeRequest(_) => None,
            Self::HandshakeReply(m) => Some(&m.connection_id),
            Self::RpcRequest(m) => Some(&m.connection_id),
            Self::RpcResolve(m) | Self::RpcReject(m) => Some(&m.connection_id),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::Encode)
    }

    /// Parses a received payload. Anything that is not one of the five
    /// protocol messages is an error the caller is expected to ignore.
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::deserialize(value).map_err(Error::Decode)
    }
}

impl RpcResponse {
    /// Collapses the response into the callee's outcome.
    ///
    /// `resolved` is the action discriminator: true for `RPC_RESOLVE`.
    pub fn into_outcome(self, resolved: bool) -> std::result::Result<Value, RemoteError> {
        if resolved {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| RemoteError::new(format!("call to '{}' was rejected", self.call_name))))
        }
    }
}
