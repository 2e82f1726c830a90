use serde_json::Value;

use super::entity::{EntityDef, EntityKind};

/// A single cell of a flat record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Key form used for uniqueness and reference lookups.
    pub fn key_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(n) => Some(n.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(n) => Value::from(*n),
        }
    }
}

/// One flat row of an entity, values aligned with `kind.def().fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: EntityKind,
    pub values: Vec<FieldValue>,
}

impl Record {
    pub fn new(kind: EntityKind, values: Vec<FieldValue>) -> Self {
        debug_assert_eq!(values.len(), kind.def().fields.len());
        Self { kind, values }
    }

    pub fn def(&self) -> &'static EntityDef {
        self.kind.def()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.def().position(field).and_then(|i| self.values.get(i))
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        if let Some(i) = self.def().position(field) {
            self.values[i] = value;
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.text("id")
    }

    /// Value of the field upserts are keyed on.
    pub fn upsert_key(&self) -> Option<String> {
        self.values[self.def().upsert_position()].key_text()
    }
}
