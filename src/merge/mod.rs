//! Deep merge of scrape results.
//!
//! A result is a JSON object whose values are objects, arrays or scalars.
//! Merging `incoming` into `base`:
//!
//! | base     | incoming        | outcome                        |
//! |----------|-----------------|--------------------------------|
//! | object   | object          | merged key by key, recursively |
//! | array    | array           | concatenated, base first       |
//! | array    | anything else   | pushed as one more entry       |
//! | any      | null            | base kept                      |
//! | null     | any             | replaced                       |
//! | scalar   | equal scalar    | kept                           |
//!
//! Every other pairing is a [`ScrapeError::MergeConflict`].

use crate::error::{Result, ScrapeError};
use serde_json::{Map, Value};

pub type ResultMap = Map<String, Value>;

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn merge_at(base: &mut Value, incoming: Value, path: &str) -> Result<()> {
    match (base, incoming) {
        (_, Value::Null) => Ok(()),
        (Value::Object(b), Value::Object(i)) => merge_maps_at(b, i, path),
        (Value::Array(b), Value::Array(i)) => {
            b.extend(i);
            Ok(())
        }
        (Value::Array(b), i) => {
            b.push(i);
            Ok(())
        }
        (b @ Value::Null, i) => {
            *b = i;
            Ok(())
        }
        (b, i) if *b == i => Ok(()),
        (b, i) => Err(ScrapeError::MergeConflict {
            path: path.to_string(),
            existing: kind(b),
            incoming: kind(&i),
        }),
    }
}

fn merge_maps_at(base: &mut ResultMap, incoming: ResultMap, path: &str) -> Result<()> {
    for (key, value) in incoming {
        match base.get_mut(&key) {
            Some(existing) => merge_at(existing, value, &child_path(path, &key))?,
            None => {
                base.insert(key, value);
            }
        }
    }
    Ok(())
}

/// Deep-merge `incoming` into `base`.
pub fn deep_merge(base: &mut Value, incoming: Value) -> Result<()> {
    merge_at(base, incoming, "")
}

/// Deep-merge two result maps.
pub fn merge_maps(base: &mut ResultMap, incoming: ResultMap) -> Result<()> {
    merge_maps_at(base, incoming, "")
}

/// Merge one callback contribution into a result map.
///
/// `null` contributes nothing; anything other than an object is a conflict.
pub fn merge_partial(result: &mut ResultMap, partial: Value) -> Result<()> {
    match partial {
        Value::Null => Ok(()),
        Value::Object(map) => merge_maps(result, map),
        other => Err(ScrapeError::MergeConflict {
            path: String::new(),
            existing: "object",
            incoming: kind(&other),
        }),
    }
}

/// Imperative append under one top-level key.
///
/// Arrays grow (extended by an array, pushed otherwise), objects are
/// shallow-updated, and anything appended onto a scalar is a conflict.
pub fn append_entry(result: &mut ResultMap, key: &str, value: Value) -> Result<()> {
    let Some(existing) = result.get_mut(key) else {
        result.insert(key.to_string(), value);
        return Ok(());
    };

    match (existing, value) {
        (Value::Array(items), Value::Array(more)) => items.extend(more),
        (Value::Array(items), v) => items.push(v),
        (Value::Object(fields), Value::Object(more)) => fields.extend(more),
        (e, v) => {
            return Err(ScrapeError::MergeConflict {
                path: key.to_string(),
                existing: kind(e),
                incoming: kind(&v),
            });
        }
    }
    Ok(())
}

/// Wrap every top-level value in a one-element array so that merging
/// several results keeps each instance's value as its own list entry.
pub fn wrap_as_list(result: ResultMap) -> ResultMap {
    result
        .into_iter()
        .map(|(k, v)| (k, Value::Array(vec![v])))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
