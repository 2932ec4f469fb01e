//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`: structs travel as maps with field names, which is
//! what the decoding side matches on.

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        id: u32,
        name: String,
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let encoded = MsgPackCodec::encode(&Sample {
            id: 1,
            name: "x".to_string(),
        })
        .unwrap();

        // 0x82 = fixmap with 2 entries; positional encoding would be 0x92
        assert_eq!(encoded[0], 0x82);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Sample> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
