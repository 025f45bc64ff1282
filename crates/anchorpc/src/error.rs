//! # Error Definitions
//!
//! Codec failures, and the serialized form of an error raised by a remote
//! method.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Failures while moving a message in or out of its JSON form.
#[derive(Debug)]
pub enum Error {
    /// The message could not be turned into a value.
    Encode(serde_json::Error),
    /// The value is not a well-formed protocol message.
    Decode(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Failed to encode message: {}", e),
            Self::Decode(e) => write!(f, "Malformed message: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) | Self::Decode(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An error as it crosses the boundary.
///
/// Error objects cannot be cloned as-is, so only the message and the
/// error's own properties travel. On the wire this is a flat object:
/// `{"message": "...", "code": 42, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            props: Map::new(),
        }
    }

    /// Attaches an extra property, e.g. an application error code.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}
