//! Message module - native values, canonical messages and normalization.
//!
//! Provides:
//! - [`Value`] - what handler code sends and receives
//! - [`Message`] - the canonical tagged form every message travels in
//! - [`normalize_outbound`] / [`normalize_inbound`] - conversions between them

mod canonical;
mod normalize;
mod value;

pub use canonical::{Message, MessageKind};
pub use normalize::{normalize_inbound, normalize_outbound};
pub use value::Value;
