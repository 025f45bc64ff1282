//! # Transferables
//!
//! Byte buffers that are moved to the peer instead of being cloned into the
//! message. The value keeps a small marker, `{"$transfer": n}`, where the
//! buffer was; the buffers themselves travel in the delivery's transfer list.
//!
//! ```ignore
//! let payload = with_transferable(|t| json!({ "frame": t.transfer(pixels), "width": 640 }));
//! ```

use serde_json::Map;
use serde_json::Value;

pub const TRANSFER_KEY: &str = "$transfer";

/// A value plus the buffers moved alongside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub value: Value,
    pub buffers: Vec<Vec<u8>>,
}

impl Payload {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            buffers: Vec::new(),
        }
    }

    /// Resolves a transfer marker found somewhere in `value`.
    pub fn buffer(&self, marker: &Value) -> Option<&[u8]> {
        marker_index(marker).and_then(|i| self.buffers.get(i)).map(Vec::as_slice)
    }

    /// Takes ownership of a transferred buffer, leaving an empty one behind.
    pub fn take_buffer(&mut self, marker: &Value) -> Option<Vec<u8>> {
        marker_index(marker)
            .and_then(|i| self.buffers.get_mut(i))
            .map(std::mem::take)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Collects buffers to move with a message.
#[derive(Debug, Default)]
pub struct Transfer {
    buffers: Vec<Vec<u8>>,
}

impl Transfer {
    /// Queues `buffer` for transfer and returns the marker to embed in the
    /// value in its place.
    pub fn transfer(&mut self, buffer: Vec<u8>) -> Value {
        let index = self.buffers.len();
        self.buffers.push(buffer);
        let mut marker = Map::new();
        marker.insert(TRANSFER_KEY.to_string(), Value::from(index));
        Value::Object(marker)
    }
}

/// Builds a payload whose marked buffers are moved rather than cloned.
pub fn with_transferable<F>(build: F) -> Payload
where
    F: FnOnce(&mut Transfer) -> Value,
{
    let mut transfer = Transfer::default();
    let value = build(&mut transfer);
    Payload {
        value,
        buffers: transfer.buffers,
    }
}

pub(crate) fn marker_index(marker: &Value) -> Option<usize> {
    let index = marker.as_object()?.get(TRANSFER_KEY)?.as_u64()?;
    usize::try_from(index).ok()
}
