//! A single canonical-JSON encoder every signable or hashable payload in the
//! protocol routes through (per the design note: never rely on whatever
//! default encoder a platform ships with).
//!
//! Canonical form: object keys sorted lexicographically (recursively),
//! no insignificant whitespace, UTF-8. `serde_json::Map` is a `BTreeMap`
//! by default and `to_vec` already emits no whitespace, but we walk and
//! rebuild the tree explicitly so canonicalization does not silently
//! depend on that default staying true.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

fn sort_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k, sort_value(v));
            }
            let mut out = serde_json::Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_value).collect()),
        other => other,
    }
}

/// Serialize `value` to its canonical JSON byte representation.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let raw = serde_json::to_value(value)?;
    let sorted = sort_value(raw);
    serde_json::to_vec(&sorted)
}

/// Same as [`canonicalize`] but returned as a `String` (canonical JSON is
/// always valid UTF-8).
pub fn canonicalize_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = canonicalize(value)?;
    Ok(String::from_utf8(bytes).expect("canonical JSON is always valid UTF-8"))
}
