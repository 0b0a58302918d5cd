//! Deterministic integrity hashing.
//!
//! Every event, access and attachment carries an `integrity` digest: a hash
//! over its *canonical form* so that two independently-constructed copies
//! of the same resource (e.g. one just written, one read back from a
//! different store) hash identically, and so that an external audit-log
//! reader can cryptographically match a write with its audit line (see
//! `stratum-audit`).
//!
//! The canonical form is a JSON object with keys sorted recursively —
//! `serde_json::Value::Object` already preserves insertion order, so we
//! rebuild the tree through a `BTreeMap` before serializing.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;

/// A digest string of the form `"sha256-<hex>"`, matching the
/// `{integrity,key}` pair audit records embed for their referenced
/// resource (`key` is the field name the digest covers, typically
/// `"integrity"`).
pub type Digest256 = String;

/// Canonicalize a JSON value by recursively sorting object keys.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hash the canonical form of a JSON value, returning `"sha256-<hex>"`.
pub fn hash_value(value: &Value) -> Digest256 {
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).expect("canonical form always serializes");
    hash_bytes(&bytes)
}

/// Hash raw bytes directly, returning `"sha256-<hex>"`.
pub fn hash_bytes(bytes: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Incremental hasher for attachments: bytes are hashed as they stream
/// through on upload, without buffering the whole file in memory.
pub struct StreamingHasher {
    hasher: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        StreamingHasher {
            hasher: Sha256::new(),
        }
    }

    pub fn finish(self) -> Digest256 {
        format!("sha256-{}", hex::encode(self.hasher.finalize()))
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for StreamingHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"id": "e1", "time": 1000, "content": "hi"});
        let b = json!({"content": "hi", "time": 1000, "id": "e1"});
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn different_content_hashes_differently() {
        let a = json!({"id": "e1", "content": "hi"});
        let b = json!({"id": "e1", "content": "bye"});
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn digest_has_algorithm_prefix() {
        let digest = hash_value(&json!({"x": 1}));
        assert!(digest.starts_with("sha256-"));
        assert_eq!(digest.len(), "sha256-".len() + 64);
    }

    #[test]
    fn streaming_hasher_matches_single_shot_for_concatenated_bytes() {
        let mut streaming = StreamingHasher::new();
        streaming.write_all(b"hello ").unwrap();
        streaming.write_all(b"world").unwrap();
        let streamed = streaming.finish();
        let direct = hash_bytes(b"hello world");
        assert_eq!(streamed, direct);
    }

    #[test]
    fn nested_objects_are_canonicalized_recursively() {
        let a = json!({"outer": {"b": 2, "a": 1}});
        let b = json!({"outer": {"a": 1, "b": 2}});
        assert_eq!(hash_value(&a), hash_value(&b));
    }
}
