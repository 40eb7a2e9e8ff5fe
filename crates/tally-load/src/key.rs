//! Row keys used for upserts.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tally_core::{EXTRACTED_AT_FIELD, Record};

/// Prefix of content-hash keys for records missing a primary-key field.
pub const SYNTHETIC_PREFIX: &str = "sha256:";

/// Key identifying `record` within its table.
///
/// The key is the JSON array of the `primary_key` field values. When any of
/// them is missing or null the key is the SHA-256 of the record's canonical
/// JSON (sorted keys, `extractedAt` excluded) so re-extracting the same
/// content yields the same key.
#[must_use]
pub fn row_key(record: &Record, primary_key: &[String]) -> String {
    let values: Option<Vec<&Value>> = primary_key
        .iter()
        .map(|field| record.get(field).filter(|value| !value.is_null()))
        .collect();
    match values {
        Some(values) if !values.is_empty() => Value::Array(values.into_iter().cloned().collect()).to_string(),
        _ => synthetic_key(record.fields()),
    }
}

/// Key of the item at `index` in an array of the row keyed `parent`.
#[must_use]
pub fn child_key(parent: &str, index: usize) -> String {
    Value::Array(vec![Value::String(parent.to_string()), Value::from(index)]).to_string()
}

fn synthetic_key(fields: &Map<String, Value>) -> String {
    let content: Map<String, Value> = fields
        .iter()
        .filter(|(name, _)| name.as_str() != EXTRACTED_AT_FIELD)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let canonical = canonical(Value::Object(content)).to_string();
    format!("{SYNTHETIC_PREFIX}{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Same value with every object's keys in sorted order.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(name, value)| (name, canonical(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        scalar => scalar,
    }
}
