//! Entity codec: the mapping between model structs and flat records.
//!
//! A record is a JSON object whose values are scalars or lists. The document
//! store writes records as-is; the relational store rebuilds them from a parent
//! row plus its child tables. Both go through [`encode`] and [`decode`] so the
//! two backends always agree on field names and defaults.

use crate::error::Result;
use crate::tasks::models::{Task, TaskTemplate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A flat field-name to value mapping.
pub type Record = Map<String, Value>;

/// A persisted entity with a stable identifier.
pub trait Entity: Serialize + DeserializeOwned {
    /// Top-level key of the document that holds the collection.
    const COLLECTION: &'static str;

    /// The entity's identifier.
    fn id(&self) -> &str;
}

impl Entity for Task {
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for TaskTemplate {
    const COLLECTION: &'static str = "templates";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Encode an entity into a record containing every field.
///
/// # Errors
///
/// Returns an error if the entity does not serialize to a JSON object.
pub fn encode<E: Entity>(entity: &E) -> Result<Record> {
    match serde_json::to_value(entity)? {
        Value::Object(record) => Ok(record),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "{} entity encoded as non-object: {other}",
            E::COLLECTION
        ))
        .into()),
    }
}

/// Decode a record into an entity.
///
/// Missing fields take their declared defaults and unknown fields are dropped.
///
/// # Errors
///
/// Returns an error if a present field has the wrong type or an unknown
/// enum value.
pub fn decode<E: Entity>(record: Record) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Decode a record stored under `key`, using the key as the id if the record
/// has none.
///
/// # Errors
///
/// Returns an error if the record cannot be decoded.
pub fn decode_keyed<E: Entity>(key: &str, mut record: Record) -> Result<E> {
    if !matches!(record.get("id"), Some(Value::String(_))) {
        record.insert("id".to_string(), Value::String(key.to_string()));
    }
    decode(record)
}
