//! JSON-path key extraction over the details payload.
//!
//! Arrays are never traversed: a path cannot step into one, and key
//! flattening stops at them. Array contents therefore never show up as
//! group-by suggestions.

use serde_json::Value;
use std::collections::BTreeSet;

use logscope_types::Entry;

/// Resolve a dot-separated path inside a details payload and coerce the value
/// to a group key. Unparsable JSON, a missing segment, or a path that runs
/// into an array or scalar all yield `None`. Empty strings count as no key.
pub fn extract_key(details_json: &str, path: &str) -> Option<String> {
    if details_json.is_empty() {
        return None;
    }
    let root: Value = serde_json::from_str(details_json).ok()?;
    let value = resolve_path(&root, path)?;
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Walk object members along `path`
pub fn resolve_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(root, |current, segment| current.as_object()?.get(segment))
}

/// Collect every dotted leaf path of an object into `keys`
pub fn flatten_keys(value: &Value, prefix: &str, keys: &mut BTreeSet<String>) {
    let Some(object) = value.as_object() else {
        return;
    };
    for (key, child) in object {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if child.is_object() {
            flatten_keys(child, &full, keys);
        } else {
            keys.insert(full);
        }
    }
}

/// Add the keys of one entry's details payload to `keys`
pub fn collect_entry_keys(entry: &Entry, keys: &mut BTreeSet<String>) {
    if entry.details_json.is_empty() {
        return;
    }
    if let Ok(value) = serde_json::from_str::<Value>(&entry.details_json) {
        flatten_keys(&value, "", keys);
    }
}

/// Sorted unique key paths found across all entries
pub fn extract_all_keys<'a, I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Entry>,
{
    let mut keys = BTreeSet::new();
    for entry in entries {
        collect_entry_keys(entry, &mut keys);
    }
    keys.into_iter().collect()
}
