//! Merge an inference result into a context document.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use dossier_core::defaults::{ENTITY_NAME_MAX_CHARS, META_KEY};
use dossier_core::{AIResponse, ChangeRecord, Error, Result};

use crate::document::{ContextDocument, EntityField, ListSlot, SUMMARY_KEY};

/// Outcome of a merge. Nothing here has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged: JsonValue,
    pub changes: Vec<ChangeRecord>,
    pub conflicts: Vec<String>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Validate an entity name and return it trimmed.
pub fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("entity name is blank".to_string()));
    }
    if trimmed.chars().count() > ENTITY_NAME_MAX_CHARS {
        return Err(Error::InvalidInput(format!(
            "entity name longer than {ENTITY_NAME_MAX_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

/// Merge `response` into `existing` as of now.
pub fn merge(existing: &JsonValue, response: &AIResponse) -> Result<MergeResult> {
    merge_at(existing, response, Utc::now())
}

/// Merge `response` into `existing`, stamping changes with `now`.
///
/// Fails only when `existing` is not a JSON object (or null). Bad entity
/// names and type mismatches become conflicts, never errors.
pub fn merge_at(
    existing: &JsonValue,
    response: &AIResponse,
    now: DateTime<Utc>,
) -> Result<MergeResult> {
    let mut doc = ContextDocument::from_value(existing)?;
    let mut changes = Vec::new();
    let mut conflicts = Vec::new();

    for field in EntityField::ALL {
        let candidates = match field {
            EntityField::People => &response.entities.people,
            EntityField::Projects => &response.entities.projects,
            EntityField::Technologies => &response.entities.technologies,
        };
        merge_entities(&mut doc, field, candidates, now, &mut changes, &mut conflicts);
    }

    merge_summary(&mut doc, &response.summary, now, &mut changes, &mut conflicts);

    // _meta is bookkeeping: always refreshed, never reported as a change.
    let mut meta = match doc.get(META_KEY) {
        Some(JsonValue::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    meta.insert("last_ai_update".to_string(), json!(now.timestamp()));
    meta.insert(
        "context_update_intent".to_string(),
        json!(response.context_update),
    );
    doc.insert(META_KEY, JsonValue::Object(meta));

    Ok(MergeResult {
        merged: doc.into_value(),
        changes,
        conflicts,
    })
}

fn merge_entities(
    doc: &mut ContextDocument,
    field: EntityField,
    candidates: &[String],
    now: DateTime<Utc>,
    changes: &mut Vec<ChangeRecord>,
    conflicts: &mut Vec<String>,
) {
    if candidates.is_empty() {
        return;
    }

    let key = field.key();
    let mut valid: Vec<&str> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match validate_name(candidate) {
            Ok(name) => valid.push(name),
            Err(_) => conflicts.push(format!("{key}:invalid:{candidate}")),
        }
    }
    if valid.is_empty() {
        return;
    }

    match doc.list_slot(field) {
        ListSlot::Missing => {
            let mut seen = HashSet::new();
            let list: Vec<JsonValue> = valid
                .into_iter()
                .filter(|name| seen.insert(*name))
                .map(|name| JsonValue::String(name.to_string()))
                .collect();
            let new_value = JsonValue::Array(list);
            changes.push(ChangeRecord {
                key: key.to_string(),
                old_value: JsonValue::Null,
                new_value: new_value.clone(),
                timestamp: now,
            });
            doc.insert(key, new_value);
        }
        ListSlot::List(current) => {
            let old_value = JsonValue::Array(current.clone());
            let mut list = current.clone();
            let mut seen: HashSet<String> = current
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect();

            let before = list.len();
            for name in valid {
                if seen.insert(name.to_string()) {
                    list.push(JsonValue::String(name.to_string()));
                }
            }
            if list.len() > before {
                let new_value = JsonValue::Array(list);
                changes.push(ChangeRecord {
                    key: key.to_string(),
                    old_value,
                    new_value: new_value.clone(),
                    timestamp: now,
                });
                doc.insert(key, new_value);
            }
        }
        ListSlot::Other(_) => conflicts.push(format!("{key}:existing_nonlist")),
    }
}

fn merge_summary(
    doc: &mut ContextDocument,
    summary: &str,
    now: DateTime<Utc>,
    changes: &mut Vec<ChangeRecord>,
    conflicts: &mut Vec<String>,
) {
    if summary.trim().is_empty() {
        return;
    }

    match doc.get(SUMMARY_KEY) {
        None => {
            changes.push(ChangeRecord {
                key: SUMMARY_KEY.to_string(),
                old_value: JsonValue::Null,
                new_value: json!(summary),
                timestamp: now,
            });
            doc.insert(SUMMARY_KEY, json!(summary));
        }
        Some(JsonValue::String(current)) => {
            if current.trim() != summary.trim() {
                changes.push(ChangeRecord {
                    key: SUMMARY_KEY.to_string(),
                    old_value: json!(current),
                    new_value: json!(summary),
                    timestamp: now,
                });
                doc.insert(SUMMARY_KEY, json!(summary));
            }
        }
        Some(_) => conflicts.push(format!("{SUMMARY_KEY}:existing_nonstring")),
    }
}
