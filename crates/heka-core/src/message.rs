//! The typed event envelope (§3 "Message").
//!
//! Dynamic typing of field values is replaced by a tagged sum over five
//! concrete kinds (§9); any access first inspects the tag. Fields with the
//! same name may repeat; lookup by name returns all occurrences in
//! insertion order, indexable by `(field_index, array_index)`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the five concrete value kinds a field's array may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Bytes(Vec<u8>),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float64(v) => Some(*v),
            FieldValue::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A named, optionally-unit-annotated array of values.
///
/// `representation` is a free-form unit string such as `"ms"` or `"count"`;
/// the core never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub representation: Option<String>,
    pub values: Vec<FieldValue>,
}

impl Field {
    pub fn new(name: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Field {
            name: name.into(),
            representation: None,
            values,
        }
    }

    pub fn with_representation(mut self, representation: impl Into<String>) -> Self {
        self.representation = Some(representation.into());
        self
    }
}

/// The structured record that flows through the pipeline.
///
/// Numeric scalar headers are always present (zero is a valid default);
/// string scalars default to empty. `uuid` is unique per distinct event
/// within a source's emission stream; `timestamp` is monotone
/// non-decreasing within a single source stream only — the pipeline itself
/// never reorders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: Uuid,
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub r#type: String,
    pub logger: String,
    pub severity: i32,
    pub payload: String,
    pub env_version: String,
    pub pid: i32,
    pub hostname: String,
    /// Ordered list of fields; insertion order is preserved and is the
    /// order any round-trip encoding must reproduce (§6).
    pub fields: Vec<Field>,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            uuid: Uuid::nil(),
            timestamp: 0,
            r#type: String::new(),
            logger: String::new(),
            severity: 0,
            payload: String::new(),
            env_version: String::new(),
            pid: 0,
            hostname: String::new(),
            fields: Vec::new(),
        }
    }
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, preserving insertion order even when the name
    /// repeats an earlier field.
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// All fields with the given name, in insertion order.
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> {
        self.fields.iter().filter(move |f| f.name == name)
    }

    /// `Fields[name][field_index][array_index]`. Missing any level yields
    /// `None` rather than erroring (§3, §4.2, §8).
    pub fn field_value(&self, name: &str, field_index: usize, array_index: usize) -> Option<&FieldValue> {
        self.fields_named(name)
            .nth(field_index)
            .and_then(|f| f.values.get(array_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_has_zeroed_numeric_and_empty_string_headers() {
        let m = Message::new();
        assert_eq!(m.timestamp, 0);
        assert_eq!(m.severity, 0);
        assert_eq!(m.pid, 0);
        assert_eq!(m.r#type, "");
        assert_eq!(m.hostname, "");
    }

    #[test]
    fn repeated_field_names_are_indexable_by_field_index() {
        let mut m = Message::new();
        m.add_field(Field::new("tag", vec![FieldValue::String("a".into())]));
        m.add_field(Field::new("tag", vec![FieldValue::String("b".into())]));

        assert_eq!(
            m.field_value("tag", 0, 0),
            Some(&FieldValue::String("a".into()))
        );
        assert_eq!(
            m.field_value("tag", 1, 0),
            Some(&FieldValue::String("b".into()))
        );
        assert_eq!(m.field_value("tag", 2, 0), None);
    }

    #[test]
    fn missing_field_or_index_yields_none() {
        let m = Message::new();
        assert_eq!(m.field_value("absent", 0, 0), None);

        let mut m = Message::new();
        m.add_field(Field::new("count", vec![FieldValue::Int64(1)]));
        assert_eq!(m.field_value("count", 0, 5), None);
    }
}
