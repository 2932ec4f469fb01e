//! Codec module - wire encoding for messages that leave the node.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`MessageCodec`] - canonical [`Message`](crate::Message) framing on top of it
//!
//! Deliveries inside a node hand the canonical message over directly; only
//! deliveries to another cluster node go through the codec.
//!
//! # Example
//!
//! ```
//! use addrbus::codec::MessageCodec;
//! use addrbus::Message;
//!
//! let bytes = MessageCodec::encode(&Message::Float(1.0)).unwrap();
//! assert_eq!(MessageCodec::decode(&bytes).unwrap(), Message::Float(1.0));
//! ```

mod msgpack;
mod wire;

pub use msgpack::MsgPackCodec;
pub use wire::MessageCodec;
