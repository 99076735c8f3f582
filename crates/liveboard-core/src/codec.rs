//! Shape Codec: conversion between [`Shape`]s and self-describing records.
//!
//! A record is a flat JSON object `{ "objectId": .., "type": .., ... }`. Decoding
//! ignores unknown extra fields and always keeps `objectId` verbatim.

use crate::shapes::{ObjectId, SHAPE_TYPES, Shape};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Key of the object identifier in every record.
pub const KEY_OBJECT_ID: &str = "objectId";
/// Key of the shape type tag in every record.
pub const KEY_TYPE: &str = "type";

/// Serialized, storage/wire form of a shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeRecord(Map<String, Value>);

impl ShapeRecord {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Wrap a JSON value; `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.0
            .get(KEY_OBJECT_ID)
            .and_then(Value::as_str)
            .map(ObjectId::from)
    }

    /// The type tag, if present.
    pub fn kind(&self) -> Option<&str> {
        self.0.get(KEY_TYPE).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// A record that cannot be turned into a shape (or vice versa).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record has no objectId")]
    MissingObjectId,
    #[error("record {0} has no type tag")]
    MissingType(ObjectId),
    #[error("record {id} has unknown type tag {tag:?}")]
    UnknownType { id: ObjectId, tag: String },
    #[error("record {id} is malformed: {source}")]
    Malformed {
        id: ObjectId,
        #[source]
        source: serde_json::Error,
    },
    #[error("shape could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("shape {id} has a non-finite number in {field}")]
    NonFinite { id: ObjectId, field: String },
}

/// Serialize a shape into its record.
///
/// JSON has no NaN or infinity, so a shape carrying one is refused rather
/// than written as a record no participant can decode.
pub fn serialize(shape: &Shape) -> Result<ShapeRecord, CodecError> {
    let value = serde_json::to_value(shape).map_err(CodecError::Serialize)?;
    if let Some(field) = null_field(&value, String::new()) {
        return Err(CodecError::NonFinite {
            id: shape.id().clone(),
            field,
        });
    }
    ShapeRecord::from_value(value).ok_or_else(|| {
        CodecError::Serialize(serde::ser::Error::custom("shape did not serialize to an object"))
    })
}

/// Path of the first `null` in `value`. Shapes never serialize `null`
/// themselves; serde_json emits it for non-finite floats.
fn null_field(value: &Value, path: String) -> Option<String> {
    match value {
        Value::Null => Some(path),
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            let path = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            null_field(v, path)
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| null_field(v, format!("{path}[{i}]"))),
        _ => None,
    }
}

/// Reconstruct a shape from its record.
pub fn deserialize(record: &ShapeRecord) -> Result<Shape, CodecError> {
    let id = record.object_id().ok_or(CodecError::MissingObjectId)?;
    let tag = record
        .kind()
        .ok_or_else(|| CodecError::MissingType(id.clone()))?;
    if !SHAPE_TYPES.contains(&tag) {
        return Err(CodecError::UnknownType {
            id,
            tag: tag.to_string(),
        });
    }
    serde_json::from_value(record.clone().into_value())
        .map_err(|source| CodecError::Malformed { id, source })
}
