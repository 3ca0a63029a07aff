//! Opaque content payload carried by every synced record.
//!
//! The remote service owns the schema of an entity's fields (title, item
//! type, creators, note text, ...). The engine only reads a handful of them
//! for display columns and otherwise passes the document through, so the
//! payload is kept as an ordered JSON object and unknown fields survive an
//! edit-without-understanding round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(Map<String, Value>);

impl Content {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a payload from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, ContentError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ContentError::NotAnObject(json_type_name(&other))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field as a string slice, if it is present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Sets a field, returning true if the stored value changed.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> bool {
        let field = field.into();
        let value = value.into();
        if self.0.get(&field) == Some(&value) {
            return false;
        }
        self.0.insert(field, value);
        true
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serializes the payload for the `content` column.
    pub fn to_json_string(&self) -> String {
        // A map of JSON values always serializes.
        Value::Object(self.0.clone()).to_string()
    }
}

impl FromStr for Content {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s).map_err(ContentError::Json)?;
        Self::from_value(value)
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, value) in &self.0 {
            match value {
                Value::String(s) => writeln!(f, "{}: {}", field, s)?,
                other => writeln!(f, "{}: {}", field, other)?,
            }
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for Content {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("content is not valid JSON: {0}")]
    Json(serde_json::Error),
    #[error("content must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
