//! Canonical JSON serialization.
//!
//! The bytes used to compute a hash and the bytes written to disk must be
//! identical (I3), and the validator must reproduce exactly the same bytes
//! from a parsed entry. This module pins the rule: recursively sort object
//! keys, then serialize compactly. Reordering this later breaks every hash
//! already on disk — see spec §9's canonicalization note.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

/// Serialize `v` to its canonical compact JSON string (sorted keys, no
/// insignificant whitespace).
pub fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize entry for canonicalization")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("stringify canonical entry")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
