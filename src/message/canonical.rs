//! Canonical message form.
//!
//! Every message handed to the transport is one of these variants. The set
//! is closed: anything the normalizer cannot map onto it is rejected before
//! dispatch.

use bytes::Bytes;

/// A message in canonical wire-representable form.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Empty body.
    Absent,
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Exact integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Structured document (a JSON object or array).
    Json(serde_json::Value),
    /// Opaque binary payload.
    Binary(Bytes),
}

/// Kind tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Absent,
    Bool,
    String,
    Int,
    Float,
    Json,
    Binary,
}

impl Message {
    /// The kind tag carried on the wire.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Absent => MessageKind::Absent,
            Message::Bool(_) => MessageKind::Bool,
            Message::String(_) => MessageKind::String,
            Message::Int(_) => MessageKind::Int,
            Message::Float(_) => MessageKind::Float,
            Message::Json(_) => MessageKind::Json,
            Message::Binary(_) => MessageKind::Binary,
        }
    }

    /// An empty structured document.
    pub fn empty_document() -> Self {
        Message::Json(serde_json::Value::Object(serde_json::Map::new()))
    }
}
