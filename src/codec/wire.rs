//! Wire encoding of canonical messages.
//!
//! A message is encoded as a MsgPack map `{ "kind": <tag>, "body": <value> }`.
//! The tag keeps integers and doubles apart even when the value is whole,
//! documents travel as their JSON text, and binary payloads use the MsgPack
//! `bin` family so they are never re-encoded.
//!
//! | kind      | body                    |
//! |-----------|-------------------------|
//! | `absent`  | (none)                  |
//! | `boolean` | bool                    |
//! | `string`  | str                     |
//! | `integer` | int                     |
//! | `double`  | float64                 |
//! | `json`    | str (JSON text)         |
//! | `buffer`  | bin                     |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::MsgPackCodec;
use crate::error::Result;
use crate::message::Message;

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
enum WireBody {
    Absent,
    Boolean(bool),
    String(String),
    Integer(i64),
    Double(f64),
    Json(String),
    Buffer(ByteBuf),
}

/// Codec for canonical messages crossing a node boundary.
pub struct MessageCodec;

impl MessageCodec {
    /// Encode a message for the wire.
    ///
    /// # Errors
    ///
    /// Returns error if the document or the envelope cannot be serialized.
    pub fn encode(message: &Message) -> Result<Bytes> {
        let wire = match message {
            Message::Absent => WireBody::Absent,
            Message::Bool(b) => WireBody::Boolean(*b),
            Message::String(s) => WireBody::String(s.clone()),
            Message::Int(n) => WireBody::Integer(*n),
            Message::Float(f) => WireBody::Double(*f),
            Message::Json(doc) => WireBody::Json(serde_json::to_string(doc)?),
            Message::Binary(b) => WireBody::Buffer(ByteBuf::from(b.to_vec())),
        };
        Ok(Bytes::from(MsgPackCodec::encode(&wire)?))
    }

    /// Decode a message from the wire.
    ///
    /// # Errors
    ///
    /// Returns error on malformed MsgPack, an unknown kind, or a document
    /// that is not valid JSON.
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        let message = match MsgPackCodec::decode::<WireBody>(bytes)? {
            WireBody::Absent => Message::Absent,
            WireBody::Boolean(b) => Message::Bool(b),
            WireBody::String(s) => Message::String(s),
            WireBody::Integer(n) => Message::Int(n),
            WireBody::Double(f) => Message::Float(f),
            WireBody::Json(text) => Message::Json(serde_json::from_str(&text)?),
            WireBody::Buffer(buf) => Message::Binary(Bytes::from(buf.into_vec())),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(message: &Message) -> Message {
        let encoded = MessageCodec::encode(message).unwrap();
        MessageCodec::decode(&encoded).unwrap()
    }

    #[test]
    fn test_numeric_kind_survives_whole_doubles() {
        assert_eq!(round_trip(&Message::Float(2.0)), Message::Float(2.0));
        assert_eq!(round_trip(&Message::Int(2)), Message::Int(2));
    }

    #[test]
    fn test_double_body_is_float64() {
        let encoded = MessageCodec::encode(&Message::Float(0.5)).unwrap();
        // float64 marker followed by 8 bytes, at the very end of the map
        let tail = &encoded[encoded.len() - 9..];
        assert_eq!(tail[0], 0xcb);
    }

    #[test]
    fn test_buffer_uses_bin_format() {
        let payload = Bytes::from_static(&[9, 8, 7]);
        let encoded = MessageCodec::encode(&Message::Binary(payload)).unwrap();
        let tail = &encoded[encoded.len() - 5..];
        assert_eq!(tail, &[0xc4, 3, 9, 8, 7]);
    }

    #[test]
    fn test_document_travels_as_json_text() {
        let doc = json!({"user": {"name": "ada", "tags": ["x", 1, 2.5]}});
        let encoded = MessageCodec::encode(&Message::Json(doc.clone())).unwrap();

        let text = serde_json::to_string(&doc).unwrap();
        let needle = text.as_bytes();
        assert!(encoded.windows(needle.len()).any(|w| w == needle));

        assert_eq!(MessageCodec::decode(&encoded).unwrap(), Message::Json(doc));
    }

    #[test]
    fn test_absent_has_no_body() {
        assert_eq!(round_trip(&Message::Absent), Message::Absent);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        #[derive(Serialize)]
        struct Bogus {
            kind: &'static str,
            body: i32,
        }

        let bogus = Bogus {
            kind: "symbol",
            body: 1,
        };
        let bytes = MsgPackCodec::encode(&bogus).unwrap();
        assert!(MessageCodec::decode(&bytes).is_err());
    }
}
