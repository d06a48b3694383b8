//! Typed view over a per-engineer context document.
//!
//! The persisted form is a flat JSON object. Known fields get accessors;
//! every other key is carried through untouched so documents written by
//! newer producers survive a merge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use dossier_core::{defaults::META_KEY, Error, Result};

/// Key holding the free-text summary.
pub const SUMMARY_KEY: &str = "summary";

/// Entity list fields of a context document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityField {
    People,
    Projects,
    Technologies,
}

impl EntityField {
    pub const ALL: [EntityField; 3] = [
        EntityField::People,
        EntityField::Projects,
        EntityField::Technologies,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            EntityField::People => "people",
            EntityField::Projects => "projects",
            EntityField::Technologies => "technologies",
        }
    }
}

/// Bookkeeping stored under `_meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMeta {
    /// Unix seconds of the last AI merge.
    #[serde(default)]
    pub last_ai_update: Option<i64>,
    #[serde(default)]
    pub context_update_intent: Option<bool>,
}

/// Shape of the value stored under an entity key.
#[derive(Debug, PartialEq)]
pub enum ListSlot<'a> {
    Missing,
    List(&'a Vec<JsonValue>),
    /// Present but not an array.
    Other(&'a JsonValue),
}

/// A context document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextDocument {
    fields: Map<String, JsonValue>,
}

impl ContextDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored JSON. `null` is an empty document; any other
    /// non-object is rejected.
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(map) => Ok(Self {
                fields: map.clone(),
            }),
            other => Err(Error::InvalidInput(format!(
                "context document must be a JSON object, got {}",
                type_name(other)
            ))),
        }
    }

    /// Parse stored bytes. Empty input is an empty document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let value: JsonValue = serde_json::from_slice(bytes)?;
        Self::from_value(&value)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.fields.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn list_slot(&self, field: EntityField) -> ListSlot<'_> {
        match self.fields.get(field.key()) {
            None => ListSlot::Missing,
            Some(JsonValue::Array(items)) => ListSlot::List(items),
            Some(other) => ListSlot::Other(other),
        }
    }

    /// String members of an entity list; non-string members are skipped.
    pub fn entities(&self, field: EntityField) -> Vec<&str> {
        match self.list_slot(field) {
            ListSlot::List(items) => items.iter().filter_map(JsonValue::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// The summary, if present and a string.
    pub fn summary(&self) -> Option<&str> {
        self.fields.get(SUMMARY_KEY).and_then(JsonValue::as_str)
    }

    /// Parsed `_meta`; a malformed value reads as empty.
    pub fn meta(&self) -> ContextMeta {
        self.fields
            .get(META_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.fields)
    }

    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.fields.clone())
    }

    /// Human-readable rendering handed to prompt templates.
    pub fn to_prompt_text(&self) -> String {
        if self.fields.is_empty() {
            return String::new();
        }
        serde_json::to_string_pretty(&self.fields).unwrap_or_default()
    }
}

impl From<Map<String, JsonValue>> for ContextDocument {
    fn from(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }
}

pub(crate) fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
