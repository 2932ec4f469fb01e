//! Error types for addrbus.

use thiserror::Error;

/// Main error type for all bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Missing or invalid argument (address, reply body, ...).
    ///
    /// Always raised synchronously by the call that received the argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The outbound value has no canonical message form.
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON document error (document encoding or typed conversion).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No reply arrived within the configured reply timeout.
    #[error("timed out waiting for a reply on {0}")]
    Timeout(String),

    /// The reply target was dropped before any reply arrived.
    #[error("no reply for message sent to {0}")]
    NoReply(String),

    /// The bus was built outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The bus has been closed.
    #[error("event bus is closed")]
    Closed,
}

/// Result type alias using BusError.
pub type Result<T> = std::result::Result<T, BusError>;
