// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema-driven normalization of JSON payloads.
//!
//! [`normalize`] walks a payload depth-first against a [`Shape`], pulls every
//! recognizable entity out into an [`EntityBatch`], and returns a
//! [`ResultDescriptor`] mirroring the payload with each entity replaced by a
//! [`ResultDescriptor::Ref`].
//!
//! Inside stored entity records, nested entity fields hold the nested
//! entity's canonical id (a JSON string); the owning schema's field map says
//! which type the id belongs to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::batch::EntityBatch;
use crate::ident::{EntityId, EntityRef, EntityType};
use crate::schema::{Resource, SchemaRegistry, Shape};

/// Errors raised while normalizing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The top-level payload is a bare scalar where structured JSON was expected.
    #[error("no parseable payload: expected a JSON object or array, found {found}")]
    NoParseablePayload {
        /// JSON kind actually received (`"string"`, `"number"`, `"boolean"`).
        found: &'static str,
    },
    /// Key extraction failed for an entity-shaped node.
    #[error("schema `{entity_type}` could not extract a key at {path}")]
    MissingKey {
        /// Schema whose key extractor failed.
        entity_type: EntityType,
        /// JSON path of the offending node (e.g. `$[1].author`).
        path: String,
    },
    /// A shape names a schema that is not registered.
    #[error("unknown schema `{entity_type}` at {path}")]
    UnknownSchema {
        /// Unresolved type tag.
        entity_type: EntityType,
        /// JSON path where it was needed.
        path: String,
    },
    /// A typed resource could not be turned back into JSON.
    #[error("could not deconstruct `{entity_type}`: {message}")]
    Deconstruct {
        /// Resource type tag.
        entity_type: EntityType,
        /// Serializer message.
        message: String,
    },
}

/// Normalized skeleton of a response.
///
/// Mirrors the payload structure; entities are replaced by references,
/// everything the shape does not recognize is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultDescriptor {
    /// JSON `null`.
    Null,
    /// Value kept as-is.
    Verbatim(Value),
    /// Reference to a normalized entity.
    Ref(EntityRef),
    /// List of descriptors.
    Array(Vec<ResultDescriptor>),
    /// Object of descriptors.
    Object(BTreeMap<String, ResultDescriptor>),
}

impl ResultDescriptor {
    /// Every entity reference in the descriptor, depth-first.
    pub fn refs(&self) -> Vec<&EntityRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a EntityRef>) {
        match self {
            Self::Null | Self::Verbatim(_) => {}
            Self::Ref(entity) => out.push(entity),
            Self::Array(items) => items.iter().for_each(|d| d.collect_refs(out)),
            Self::Object(fields) => fields.values().for_each(|d| d.collect_refs(out)),
        }
    }

    /// Stored form inside an entity record (references become ids).
    fn into_stored(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Verbatim(value) => value,
            Self::Ref(entity) => Value::String(entity.id.0),
            Self::Array(items) => Value::Array(items.into_iter().map(Self::into_stored).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, d)| (k, d.into_stored()))
                    .collect(),
            ),
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Every entity found in the payload.
    pub entities: EntityBatch,
    /// Skeleton of the payload.
    pub result: ResultDescriptor,
}

/// Normalize `value` against `shape`.
///
/// # Errors
///
/// - [`NormalizeError::NoParseablePayload`] when `shape` expects structure and
///   `value` is a bare string, number or boolean.
/// - [`NormalizeError::MissingKey`] when an entity's key cannot be extracted.
/// - [`NormalizeError::UnknownSchema`] when a shape names an unregistered type.
pub fn normalize(
    registry: &SchemaRegistry,
    shape: &Shape,
    value: &Value,
) -> Result<Normalized, NormalizeError> {
    if let Some(found) = scalar_kind(value).filter(|_| shape.expects_structure()) {
        return Err(NormalizeError::NoParseablePayload { found });
    }
    let mut walker = Normalizer {
        registry,
        entities: EntityBatch::new(),
        path: String::from("$"),
    };
    let result = walker.visit(shape, value)?;
    Ok(Normalized {
        entities: walker.entities,
        result,
    })
}

/// Normalize a typed resource (e.g. an optimistic local value).
///
/// # Errors
///
/// [`NormalizeError::Deconstruct`] if serialization fails, otherwise as
/// [`normalize`].
pub fn normalize_resource<R: Resource>(
    registry: &SchemaRegistry,
    resource: &R,
) -> Result<Normalized, NormalizeError> {
    let value = serde_json::to_value(resource).map_err(|err| NormalizeError::Deconstruct {
        entity_type: EntityType::new(R::ENTITY_TYPE),
        message: err.to_string(),
    })?;
    normalize(registry, &Shape::entity(R::ENTITY_TYPE), &value)
}

fn scalar_kind(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(_) => Some("string"),
        Value::Number(_) => Some("number"),
        Value::Bool(_) => Some("boolean"),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

struct Normalizer<'r> {
    registry: &'r SchemaRegistry,
    entities: EntityBatch,
    path: String,
}

impl Normalizer<'_> {
    fn visit(&mut self, shape: &Shape, value: &Value) -> Result<ResultDescriptor, NormalizeError> {
        match (shape, value) {
            (_, Value::Null) => Ok(ResultDescriptor::Null),
            (Shape::Entity(name), Value::Object(fields)) => {
                self.visit_entity(name, fields).map(ResultDescriptor::Ref)
            }
            (Shape::Entity(name), Value::String(_) | Value::Number(_)) => {
                // Already normalized: the payload carries the id itself.
                self.require_schema(name)?;
                Ok(EntityId::from_json(value).map_or_else(
                    || ResultDescriptor::Verbatim(value.clone()),
                    |id| ResultDescriptor::Ref(EntityRef::new(name.clone(), id)),
                ))
            }
            (Shape::Array(inner), Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let mark = self.push_index(index);
                    out.push(self.visit(inner, item)?);
                    self.path.truncate(mark);
                }
                Ok(ResultDescriptor::Array(out))
            }
            (Shape::Object(declared), Value::Object(fields)) => {
                let mut out = BTreeMap::new();
                for (field, item) in fields {
                    let descriptor = match declared.get(field) {
                        Some(inner) => {
                            let mark = self.push_field(field);
                            let descriptor = self.visit(inner, item)?;
                            self.path.truncate(mark);
                            descriptor
                        }
                        None => ResultDescriptor::Verbatim(item.clone()),
                    };
                    out.insert(field.clone(), descriptor);
                }
                Ok(ResultDescriptor::Object(out))
            }
            (Shape::Values(inner), Value::Object(fields)) => {
                let mut out = BTreeMap::new();
                for (field, item) in fields {
                    let mark = self.push_field(field);
                    out.insert(field.clone(), self.visit(inner, item)?);
                    self.path.truncate(mark);
                }
                Ok(ResultDescriptor::Object(out))
            }
            _ => Ok(ResultDescriptor::Verbatim(value.clone())),
        }
    }

    fn visit_entity(
        &mut self,
        name: &EntityType,
        fields: &Map<String, Value>,
    ) -> Result<EntityRef, NormalizeError> {
        let registry = self.registry;
        let schema = registry
            .get(name)
            .ok_or_else(|| NormalizeError::UnknownSchema {
                entity_type: name.clone(),
                path: self.path.clone(),
            })?;
        let entity = schema
            .entity_ref(fields)
            .ok_or_else(|| NormalizeError::MissingKey {
                entity_type: name.clone(),
                path: self.path.clone(),
            })?;

        let mut stored = fields.clone();
        for (field, shape) in schema.fields() {
            let Some(nested) = fields.get(field) else {
                continue;
            };
            let mark = self.push_field(field);
            let descriptor = self.visit(shape, nested)?;
            self.path.truncate(mark);
            stored.insert(field.clone(), descriptor.into_stored());
        }
        self.entities.insert(entity.clone(), stored);
        Ok(entity)
    }

    fn require_schema(&self, name: &EntityType) -> Result<(), NormalizeError> {
        if self.registry.get(name).is_some() {
            Ok(())
        } else {
            Err(NormalizeError::UnknownSchema {
                entity_type: name.clone(),
                path: self.path.clone(),
            })
        }
    }

    fn push_index(&mut self, index: usize) -> usize {
        let mark = self.path.len();
        self.path.push('[');
        self.path.push_str(&index.to_string());
        self.path.push(']');
        mark
    }

    fn push_field(&mut self, field: &str) -> usize {
        let mark = self.path.len();
        self.path.push('.');
        self.path.push_str(field);
        mark
    }
}
