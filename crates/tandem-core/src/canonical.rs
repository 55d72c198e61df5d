//! Deterministic CBOR for content digests.
//!
//! Replicas holding the same materialized content must produce the same
//! bytes whatever their map iteration order, so digests compare equal.
//! Follows RFC 8949 core deterministic encoding: shortest-form heads,
//! definite lengths, map keys ordered by their encoded bytes. Floats and
//! duplicate map keys are rejected.

use ciborium::value::Value;
use serde::Serialize;

use crate::error::{CoreError, Result};

const UNSIGNED: u8 = 0;
const NEGATIVE: u8 = 1;
const BYTES: u8 = 2;
const TEXT: u8 = 3;
const ARRAY: u8 = 4;
const MAP: u8 = 5;
const TAG: u8 = 6;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;

/// Encode any serializable value to deterministic CBOR.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = Value::serialized(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    canonical_value_bytes(&value)
}

/// Encode an already-built CBOR value to deterministic bytes.
pub fn canonical_value_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut encoder = Encoder::default();
    encoder.value(value)?;
    Ok(encoder.out)
}

#[derive(Default)]
struct Encoder {
    out: Vec<u8>,
}

impl Encoder {
    fn value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Integer(i) => {
                let n = i128::from(*i);
                if n >= 0 {
                    self.head(UNSIGNED, n as u64);
                } else {
                    self.head(NEGATIVE, (-1 - n) as u64);
                }
            }
            Value::Bytes(bytes) => {
                self.head(BYTES, bytes.len() as u64);
                self.out.extend_from_slice(bytes);
            }
            Value::Text(text) => {
                self.head(TEXT, text.len() as u64);
                self.out.extend_from_slice(text.as_bytes());
            }
            Value::Array(items) => {
                self.head(ARRAY, items.len() as u64);
                for item in items {
                    self.value(item)?;
                }
            }
            Value::Map(entries) => self.map(entries)?,
            Value::Tag(tag, inner) => {
                self.head(TAG, *tag);
                self.value(inner)?;
            }
            Value::Bool(b) => self.out.push(if *b { TRUE } else { FALSE }),
            Value::Null => self.out.push(NULL),
            Value::Float(_) => {
                return Err(CoreError::EncodingError("floats have no canonical form".into()))
            }
            other => {
                return Err(CoreError::EncodingError(format!(
                    "unsupported CBOR value: {other:?}"
                )))
            }
        }
        Ok(())
    }

    fn map(&mut self, entries: &[(Value, Value)]) -> Result<()> {
        let mut encoded = entries
            .iter()
            .map(|(key, value)| {
                let key = canonical_value_bytes(key)?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>>>()?;
        encoded.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        if encoded.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(CoreError::EncodingError("duplicate map key".into()));
        }

        self.head(MAP, encoded.len() as u64);
        for (key, value) in encoded {
            self.out.extend_from_slice(&key);
            self.value(value)?;
        }
        Ok(())
    }

    /// Major type plus argument, in the shortest form that fits.
    fn head(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        match arg {
            0..=23 => self.out.push(major | arg as u8),
            24..=0xff => self.out.extend_from_slice(&[major | 24, arg as u8]),
            0x100..=0xffff => {
                self.out.push(major | 25);
                self.out.extend_from_slice(&(arg as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.out.push(major | 26);
                self.out.extend_from_slice(&(arg as u32).to_be_bytes());
            }
            _ => {
                self.out.push(major | 27);
                self.out.extend_from_slice(&arg.to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    fn head(major: u8, arg: u64) -> Vec<u8> {
        let mut encoder = Encoder::default();
        encoder.head(major, arg);
        encoder.out
    }

    #[test]
    fn test_shortest_heads() {
        assert_eq!(head(UNSIGNED, 23), vec![0x17]);
        assert_eq!(head(UNSIGNED, 24), vec![0x18, 24]);
        assert_eq!(head(UNSIGNED, 256), vec![0x19, 0x01, 0x00]);
        assert_eq!(head(TEXT, 0x1_0000), vec![0x7a, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(head(MAP, 2), vec![0xa2]);
    }

    #[test]
    fn test_map_keys_sorted_by_encoding() {
        let map = Value::Map(vec![
            (Value::Text("bb".into()), Value::Integer(2.into())),
            (Value::Text("a".into()), Value::Integer(1.into())),
        ]);

        // "a" encodes shorter, so it sorts first.
        assert_eq!(
            canonical_value_bytes(&map).unwrap(),
            vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]
        );
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let map = Value::Map(vec![
            (Value::Text("k".into()), Value::Integer(1.into())),
            (Value::Text("k".into()), Value::Integer(2.into())),
        ]);
        assert!(canonical_value_bytes(&map).is_err());
    }

    #[test]
    fn test_floats_rejected() {
        assert!(canonical_bytes(&1.5f64).is_err());
    }

    #[test]
    fn test_negative_integers() {
        assert_eq!(canonical_bytes(&-1i64).unwrap(), vec![0x20]);
        assert_eq!(canonical_bytes(&-25i64).unwrap(), vec![0x38, 24]);
    }

    #[test]
    fn test_content_map_matches_btree() {
        let mut hashed = HashMap::new();
        let mut ordered = BTreeMap::new();
        for i in (0..32u32).rev() {
            hashed.insert(format!("key-{i}"), format!("value-{i}"));
            ordered.insert(format!("key-{i}"), format!("value-{i}"));
        }

        assert_eq!(
            canonical_bytes(&hashed).unwrap(),
            canonical_bytes(&ordered).unwrap()
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn insertion_order_never_changes_bytes(
                entries in prop::collection::vec(("[a-z]{1,8}", any::<u32>()), 0..24)
            ) {
                let hashed: HashMap<_, _> = entries.iter().cloned().collect();
                let ordered: BTreeMap<_, _> = entries.iter().cloned().collect();

                prop_assert_eq!(
                    canonical_bytes(&hashed).unwrap(),
                    canonical_bytes(&ordered).unwrap()
                );
            }
        }
    }
}
