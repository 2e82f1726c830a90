//! JSON document codec for snapshots.
//!
//! The document is flat: one top-level key per entity kind, each holding an
//! array of flat records whose relations are plain foreign-key scalars.
//! Decoding checks shape only (object/array layout, required fields, field
//! types, duplicate keys). Whether foreign keys resolve is the restore
//! engine's concern.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{EntityKind, FieldDef, FieldDefault, FieldType, FieldValue, Record};

use super::Snapshot;

pub const FORMAT: &str = "inventory-snapshot";
pub const FORMAT_VERSION: u64 = 1;
const META_KEY: &str = "meta";

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn encode(snapshot: &Snapshot) -> AppResult<String> {
    serde_json::to_string_pretty(&to_document(snapshot))
        .map_err(|e| AppError::Internal(format!("Failed to serialize snapshot: {}", e)))
}

pub fn to_document(snapshot: &Snapshot) -> Value {
    let mut doc = Map::new();
    doc.insert(
        META_KEY.to_string(),
        json!({
            "format": FORMAT,
            "version": FORMAT_VERSION,
            "exportedAt": now_timestamp(),
        }),
    );
    for kind in snapshot.covered() {
        let records = snapshot.table(kind).iter().map(record_to_json).collect();
        doc.insert(kind.key().to_string(), Value::Array(records));
    }
    Value::Object(doc)
}

pub fn record_to_json(record: &Record) -> Value {
    let fields = record
        .def()
        .fields
        .iter()
        .zip(&record.values)
        .map(|(field, value)| (field.name.to_string(), value.to_json()))
        .collect::<Map<_, _>>();
    Value::Object(fields)
}

pub fn decode(text: &str) -> AppResult<Snapshot> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| AppError::CorruptPayload(format!("snapshot is not valid JSON: {}", e)))?;
    from_document(&doc)
}

pub fn from_document(doc: &Value) -> AppResult<Snapshot> {
    let root = doc.as_object().ok_or_else(|| {
        AppError::SchemaMismatch(format!(
            "snapshot root must be an object, found {}",
            type_name(doc)
        ))
    })?;

    check_meta(root.get(META_KEY))?;
    for key in root.keys() {
        if key != META_KEY && EntityKind::from_key(key).is_none() {
            tracing::debug!("Ignoring unknown snapshot key '{}'", key);
        }
    }

    let mut snapshot = Snapshot::new();
    for kind in EntityKind::ALL {
        let entries = match root.get(kind.key()) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(AppError::SchemaMismatch(format!(
                    "'{}' must be an array, found {}",
                    kind.key(),
                    type_name(other)
                )))
            }
        };

        let records = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| decode_record(kind, entry, index))
            .collect::<AppResult<Vec<_>>>()?;
        check_duplicates(kind, &records)?;
        snapshot.insert_table(kind, records);
    }

    Ok(snapshot)
}

fn check_meta(meta: Option<&Value>) -> AppResult<()> {
    let meta = match meta {
        // legacy snapshot
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Object(meta)) => meta,
        Some(other) => {
            return Err(AppError::SchemaMismatch(format!(
                "'{}' must be an object, found {}",
                META_KEY,
                type_name(other)
            )))
        }
    };

    let version = match meta.get("version") {
        None | Some(Value::Null) => return Ok(()),
        Some(raw) => raw.as_u64().ok_or_else(|| {
            AppError::SchemaMismatch(format!(
                "snapshot format version must be a non-negative integer, found {}",
                raw
            ))
        })?,
    };
    if version > FORMAT_VERSION {
        return Err(AppError::SchemaMismatch(format!(
            "snapshot format version {} is newer than supported version {}",
            version, FORMAT_VERSION
        )));
    }
    Ok(())
}

/// Decodes one record, substituting defaults for absent optional fields.
pub fn decode_record(kind: EntityKind, entry: &Value, index: usize) -> AppResult<Record> {
    let def = kind.def();
    let at = || format!("{}[{}]", kind.key(), index);

    let fields = entry.as_object().ok_or_else(|| {
        AppError::SchemaMismatch(format!(
            "{} must be an object, found {}",
            at(),
            type_name(entry)
        ))
    })?;

    let mut values = Vec::with_capacity(def.fields.len());
    for field in def.fields {
        let raw = fields.get(field.name).filter(|v| !v.is_null());
        let value = match raw {
            Some(raw) => coerce(field, raw).map_err(|reason| {
                AppError::SchemaMismatch(format!("{}.{} {}", at(), field.name, reason))
            })?,
            None => FieldValue::Null,
        };

        // Empty optional references mean "no parent"
        let value = match value {
            FieldValue::Text(s) if s.is_empty() && field.references.is_some() => FieldValue::Null,
            other => other,
        };

        let value = if value.is_null() {
            if field.required {
                return Err(AppError::SchemaMismatch(format!(
                    "{} is missing required field '{}'",
                    at(),
                    field.name
                )));
            }
            default_value(field)
        } else {
            value
        };

        if field.required && value.as_str() == Some("") {
            return Err(AppError::SchemaMismatch(format!(
                "{}.{} must not be empty",
                at(),
                field.name
            )));
        }
        values.push(value);
    }

    Ok(Record::new(kind, values))
}

fn default_value(field: &FieldDef) -> FieldValue {
    match field.default {
        FieldDefault::Null => FieldValue::Null,
        FieldDefault::Text(s) => FieldValue::Text(s.to_string()),
        FieldDefault::Integer(n) => FieldValue::Integer(n),
        // keeps a re-import from restamping rows it already wrote
        FieldDefault::Now => FieldValue::Null,
    }
}

fn coerce(field: &FieldDef, raw: &Value) -> Result<FieldValue, String> {
    match field.ty {
        FieldType::Text => match raw {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            other => Err(format!("must be a string, found {}", type_name(other))),
        },
        FieldType::Document => match raw {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            other => Ok(FieldValue::Text(other.to_string())),
        },
        FieldType::Integer => match raw {
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("must be an integer, found {}", n)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| format!("must be an integer, found '{}'", s)),
            other => Err(format!("must be an integer, found {}", type_name(other))),
        },
        FieldType::Decimal => match raw {
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::String(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(FieldValue::Text(trimmed.to_string())),
                    _ => Err(format!("must be a decimal number, found '{}'", s)),
                }
            }
            other => Err(format!("must be a decimal number, found {}", type_name(other))),
        },
        FieldType::Timestamp => match raw {
            Value::String(s) if is_timestamp(s) => Ok(FieldValue::Text(s.clone())),
            Value::String(s) => Err(format!("must be an ISO-8601 timestamp, found '{}'", s)),
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|dt| FieldValue::Text(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .ok_or_else(|| format!("must be a timestamp, found {}", n)),
            other => Err(format!("must be a timestamp, found {}", type_name(other))),
        },
    }
}

fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn check_duplicates(kind: EntityKind, records: &[Record]) -> AppResult<()> {
    for (position, field) in kind.def().fields.iter().enumerate() {
        if !field.unique {
            continue;
        }
        let mut seen = HashSet::new();
        for record in records {
            if let Some(value) = record.values[position].key_text() {
                if !seen.insert(value.clone()) {
                    return Err(AppError::SchemaMismatch(format!(
                        "duplicate {} '{}' in '{}'",
                        field.name,
                        value,
                        kind.key()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
