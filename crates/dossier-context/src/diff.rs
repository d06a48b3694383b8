//! Key-wise diff between two context documents.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use dossier_core::{ChangeRecord, Result};

use crate::document::ContextDocument;

/// Diff two documents as of now.
pub fn diff_contexts(before: &JsonValue, after: &JsonValue) -> Result<Vec<ChangeRecord>> {
    diff_contexts_at(before, after, Utc::now())
}

/// Compare `before` and `after` key by key.
///
/// Additions carry a `null` old value, deletions a `null` new value. The
/// order of the returned records is not meaningful.
pub fn diff_contexts_at(
    before: &JsonValue,
    after: &JsonValue,
    now: DateTime<Utc>,
) -> Result<Vec<ChangeRecord>> {
    let before = ContextDocument::from_value(before)?;
    let after = ContextDocument::from_value(after)?;
    let mut out = Vec::new();

    for (key, new_value) in after.as_map() {
        match before.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => out.push(record(key, old_value.clone(), new_value.clone(), now)),
            None => out.push(record(key, JsonValue::Null, new_value.clone(), now)),
        }
    }

    for (key, old_value) in before.as_map() {
        if !after.contains_key(key) {
            out.push(record(key, old_value.clone(), JsonValue::Null, now));
        }
    }

    Ok(out)
}

fn record(key: &str, old_value: JsonValue, new_value: JsonValue, now: DateTime<Utc>) -> ChangeRecord {
    ChangeRecord {
        key: key.to_string(),
        old_value,
        new_value,
        timestamp: now,
    }
}
