//! Record flattening into tabular columns.
//!
//! Nested objects become `Parent_Child` columns. A top-level array of objects
//! (an invoice's `LineItems`) is split off as child rows, see [`explode`];
//! an empty top-level array means "no items" and yields no column. Any other
//! array is kept whole as JSON text. Scalars pass through unchanged.

use serde_json::{Map, Value};

/// Joins parent and child field names.
pub const SEPARATOR: char = '_';

/// A record split into its own columns and its child item lists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Exploded {
    pub columns: Map<String, Value>,
    /// Field name and items of every top-level array of objects, in field
    /// order. Items are already flattened.
    pub children: Vec<(String, Vec<Map<String, Value>>)>,
}

/// Flatten `fields`, splitting top-level arrays of objects into child lists.
///
/// Arrays inside a child item stay JSON text; only one level is split.
#[must_use]
pub fn explode(fields: Map<String, Value>) -> Exploded {
    let mut exploded = Exploded::default();
    for (name, value) in fields {
        match value {
            Value::Array(items) if items.is_empty() => {}
            Value::Array(items) if is_item_list(&items) => {
                let items = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(item) => Some(flatten(item)),
                        _ => None,
                    })
                    .collect();
                exploded.children.push((name, items));
            }
            value => flatten_into(&mut exploded.columns, name, value),
        }
    }
    exploded
}

fn is_item_list(items: &[Value]) -> bool {
    items.iter().all(Value::is_object)
}

/// Flatten one record's fields into column/value pairs.
#[must_use]
pub fn flatten(fields: Map<String, Value>) -> Map<String, Value> {
    let mut columns = Map::new();
    for (name, value) in fields {
        flatten_into(&mut columns, name, value);
    }
    columns
}

fn flatten_into(columns: &mut Map<String, Value>, name: String, value: Value) {
    match value {
        Value::Object(children) if children.is_empty() => {
            columns.insert(name, Value::Null);
        }
        Value::Object(children) => {
            for (child, value) in children {
                flatten_into(columns, format!("{name}{SEPARATOR}{child}"), value);
            }
        }
        array @ Value::Array(_) => {
            columns.insert(name, Value::String(array.to_string()));
        }
        scalar => {
            columns.insert(name, scalar);
        }
    }
}

/// Text form of a flattened value as stored in a table cell.
#[must_use]
pub fn cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
