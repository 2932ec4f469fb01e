//! Message normalizer.
//!
//! Outbound: native [`Value`] → canonical [`Message`], applied to every body
//! given to `send`, `publish` and `reply`.
//!
//! Inbound: canonical [`Message`] → native [`Value`], applied exactly once per
//! handler invocation, right before the handler runs.
//!
//! # Numbers
//!
//! A native number does not reliably say whether the caller meant an integer
//! or a float, so the rule is by value: a float with no fractional part that
//! fits an `i64` is sent as an integer. `3.0` therefore arrives as `3`.

use crate::error::{BusError, Result};

use super::value::integral;
use super::{Message, Value};

/// Convert an outbound value to its canonical message.
///
/// # Errors
///
/// Returns [`BusError::UnsupportedType`] for foreign values (functions,
/// symbols and the like).
pub fn normalize_outbound(value: Value) -> Result<Message> {
    let message = match value {
        Value::Undefined => Message::Absent,
        Value::Null => Message::empty_document(),
        Value::Bool(b) => Message::Bool(b),
        Value::String(s) => Message::String(s),
        Value::Binary(b) => Message::Binary(b),
        Value::Int(n) => Message::Int(n),
        Value::Float(f) => integral(f).map_or(Message::Float(f), Message::Int),
        tree @ (Value::Array(_) | Value::Object(_)) => Message::Json(tree.into_json()),
        Value::Foreign { type_name } => return Err(BusError::UnsupportedType(type_name)),
    };
    Ok(message)
}

/// Convert an inbound canonical message to the value a handler receives.
pub fn normalize_inbound(message: Message) -> Value {
    match message {
        Message::Absent => Value::Undefined,
        Message::Bool(b) => Value::Bool(b),
        Message::String(s) => Value::String(s),
        Message::Int(n) => Value::Int(n),
        Message::Float(f) => Value::Float(f),
        Message::Json(doc) => Value::from(doc),
        Message::Binary(b) => Value::Binary(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(
            normalize_outbound(Value::from("hi")).unwrap(),
            Message::String("hi".to_string())
        );
        assert_eq!(
            normalize_outbound(Value::Bool(false)).unwrap(),
            Message::Bool(false)
        );
        assert_eq!(
            normalize_outbound(Value::Undefined).unwrap(),
            Message::Absent
        );
    }

    #[test]
    fn test_binary_is_not_reencoded() {
        let payload = Bytes::from_static(b"\x00\x01binary");
        let message = normalize_outbound(Value::Binary(payload.clone())).unwrap();
        match message {
            Message::Binary(b) => assert_eq!(b.as_ptr(), payload.as_ptr()),
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_number_kind_by_value() {
        assert_eq!(
            normalize_outbound(Value::Int(-4)).unwrap(),
            Message::Int(-4)
        );
        assert_eq!(
            normalize_outbound(Value::Float(3.0)).unwrap(),
            Message::Int(3)
        );
        assert_eq!(
            normalize_outbound(Value::Float(3.25)).unwrap(),
            Message::Float(3.25)
        );
        assert_eq!(
            normalize_outbound(Value::Float(1e300)).unwrap(),
            Message::Float(1e300)
        );
        assert!(matches!(
            normalize_outbound(Value::Float(f64::NAN)).unwrap(),
            Message::Float(f) if f.is_nan()
        ));
    }

    #[test]
    fn test_null_becomes_empty_document() {
        assert_eq!(
            normalize_outbound(Value::Null).unwrap(),
            Message::Json(json!({}))
        );
    }

    #[test]
    fn test_tree_becomes_document() {
        let value = Value::object([
            ("a", Value::from(1)),
            ("b", Value::Array(vec![Value::from(true), Value::Null])),
        ]);
        assert_eq!(
            normalize_outbound(value).unwrap(),
            Message::Json(json!({"a": 1, "b": [true, null]}))
        );
    }

    #[test]
    fn test_foreign_value_rejected() {
        let err = normalize_outbound(Value::foreign("function")).unwrap_err();
        assert!(matches!(err, BusError::UnsupportedType(ref t) if t == "function"));
    }

    #[test]
    fn test_inbound_document_becomes_tree() {
        let value = normalize_inbound(Message::Json(json!({"a": {"b": [1, 2.5]}})));
        let inner = value.get("a").and_then(|a| a.get("b")).cloned();
        assert_eq!(
            inner,
            Some(Value::Array(vec![Value::Int(1), Value::Float(2.5)]))
        );
    }

    #[test]
    fn test_integral_float_round_trips_as_integer() {
        let back = normalize_inbound(normalize_outbound(Value::Float(3.0)).unwrap());
        assert_eq!(back, Value::Int(3));
    }
}
