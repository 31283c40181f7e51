//! Flattening of JSON documents into dotted leaf paths.
//!
//! Path segments escape `~` as `~0` and `.` as `~1`, so any key survives a
//! flatten/unflatten round trip. Arrays, scalars and empty objects are
//! leaves; nulls are dropped.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub fn escape_segment(key: &str) -> String {
    key.replace('~', "~0").replace('.', "~1")
}

pub fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", ".").replace("~0", "~")
}

/// All leaf values of `map`, keyed by dotted path.
pub fn flatten(map: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        collect_leaves(value, escape_segment(key), &mut out);
    }
    out
}

fn collect_leaves(value: &Value, path: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Null => {}
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, format!("{path}.{}", escape_segment(key)), out);
            }
        }
        leaf => {
            out.insert(path, leaf.clone());
        }
    }
}

/// Rebuild a nested map from dotted leaf paths.
pub fn unflatten(leaves: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    for (path, value) in leaves {
        insert_path(&mut root, path, value.clone());
    }
    root
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<String> = path.split('.').map(unescape_segment).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}
