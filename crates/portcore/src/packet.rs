//! Immutable envelopes carried between ports.

use crate::port::Writer;
use crate::{NodeError, Value};
use std::fmt;
use std::sync::Arc;

/// One payload in flight. Cloning shares the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    payload: Arc<Value>,
}

impl Packet {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: Arc::new(payload.into()),
        }
    }

    /// Packet with a `Null` payload, used when a node produces no output.
    pub fn none() -> Self {
        Self::new(Value::Null)
    }

    pub fn error(err: impl fmt::Display) -> Self {
        Self::new(Value::Error(err.to_string()))
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        Arc::try_unwrap(self.payload).unwrap_or_else(|shared| (*shared).clone())
    }

    pub fn is_error(&self) -> bool {
        self.payload.is_error()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.payload.as_error()
    }
}

impl From<Value> for Packet {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<NodeError> for Packet {
    fn from(err: NodeError) -> Self {
        Self::error(err)
    }
}

/// Folds the acknowledgments of one fan-out write into a single packet.
///
/// Errors dominate: if any packet is an error the result is an error whose
/// message joins every error message. Identical payloads collapse to one;
/// otherwise the payloads are gathered into an `Array`.
pub fn merge(packets: Vec<Packet>) -> Packet {
    let errors: Vec<&str> = packets.iter().filter_map(Packet::error_message).collect();
    if !errors.is_empty() {
        return Packet::new(Value::Error(errors.join("; ")));
    }

    let mut iter = packets.into_iter();
    let Some(first) = iter.next() else {
        return Packet::none();
    };
    let rest: Vec<Packet> = iter.collect();
    if rest.iter().all(|p| p == &first) {
        return first;
    }

    let mut payloads = Vec::with_capacity(rest.len() + 1);
    payloads.push(first.into_payload());
    payloads.extend(rest.into_iter().map(Packet::into_payload));
    Packet::new(Value::Array(payloads))
}

/// Writes `pck` and waits for its acknowledgment.
///
/// With nothing linked downstream the written packet itself is returned, so
/// a dangling pipeline still closes the loop back to its caller.
pub async fn call(writer: &Writer, pck: Packet) -> Packet {
    writer.send(pck).await.wait().await
}
