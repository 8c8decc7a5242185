//! Payload codec for stored cache records.
//!
//! A record is one logical entry: the lookup key mapped to an arbitrary
//! JSON value. The wire form is a single-entry JSON object
//! `{"<key>": <value>}`, which is self-describing and needs no schema
//! registry. Decoding verifies the shape and that the entry carries the
//! key that was asked for - anything else is corruption, not a miss.
//!
//! The format is an internal contract between `set` and `get`. It has no
//! version negotiation; changing it invalidates every record written by
//! older builds.

use serde_json::Value;
use vitesse_core::CodecError;

/// One logical cache record: a key mapped to an arbitrary JSON value.
///
/// Entries are replaced wholesale by a later `set` on the same key,
/// never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
}

impl CacheEntry {
    /// Create an entry for the given key and value.
    pub fn new<K: Into<String>>(key: K, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Serialize this entry to its stored payload.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut map = serde_json::Map::with_capacity(1);
        map.insert(self.key.clone(), self.value.clone());
        serde_json::to_vec(&map).map_err(|e| CodecError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Deserialize a stored payload back into the entry for `expected_key`.
    ///
    /// Fails when the payload is truncated or not JSON, when it does not
    /// hold exactly one entry, or when the entry is keyed by anything
    /// other than `expected_key`.
    pub fn decode(bytes: &[u8], expected_key: &str) -> Result<Self, CodecError> {
        let map: serde_json::Map<String, Value> =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed {
                reason: e.to_string(),
            })?;

        let entries = map.len();
        let mut iter = map.into_iter();
        match (iter.next(), iter.next()) {
            (Some((key, value)), None) => {
                if key != expected_key {
                    return Err(CodecError::KeyMismatch {
                        expected: expected_key.to_string(),
                        found: key,
                    });
                }
                Ok(Self { key, value })
            }
            _ => Err(CodecError::WrongShape { entries }),
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Strategy for arbitrary JSON values, floats excluded since JSON
    /// numbers do not round-trip NaN/infinity.
    fn json_value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::btree_map(".*", inner, 0..8)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// decode(encode(e)) == e for every valid entry.
        #[test]
        fn prop_encode_decode_roundtrip(key in ".*", value in json_value_strategy()) {
            let entry = CacheEntry::new(key.clone(), value);
            let payload = entry.encode().expect("encode should succeed");
            let decoded = CacheEntry::decode(&payload, &key).expect("decode should succeed");
            prop_assert_eq!(entry, decoded);
        }

        /// Decoding under a different key is always a key-mismatch error.
        #[test]
        fn prop_decode_wrong_key_fails(key in "[a-z]{1,16}", value in json_value_strategy()) {
            let entry = CacheEntry::new(key.clone(), value);
            let payload = entry.encode().expect("encode should succeed");
            let other = format!("{key}-other");
            let err = CacheEntry::decode(&payload, &other).expect_err("must fail");
            let is_key_mismatch = matches!(err, CodecError::KeyMismatch { .. });
            prop_assert!(is_key_mismatch);
        }
    }
}
