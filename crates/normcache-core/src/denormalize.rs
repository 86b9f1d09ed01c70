// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reconstruction of denormalized values from result descriptors.
//!
//! The denormalizer reads entity records through the [`EntitySource`] port,
//! so it runs against a live [`NormalizedCache`](crate::NormalizedCache) or
//! directly against the [`EntityBatch`] a normalize pass produced. It never
//! mutates anything: the same descriptor over the same snapshot always
//! yields the same value.
//!
//! # Absence Semantics
//!
//! A missing entity is reported, never papered over. [`DenormalizeError::Missing`]
//! means "not in the cache (yet)"; [`DenormalizeError::Gone`] means the entity
//! was deleted through the engine and should be treated as a 404.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::batch::EntityBatch;
use crate::ident::{EntityId, EntityRef, EntityType, RequestKey};
use crate::normalize::ResultDescriptor;
use crate::schema::{Resource, SchemaRegistry, Shape};

/// Errors raised while reconstructing a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenormalizeError {
    /// A referenced entity is not present (still loading, or invalidated).
    #[error("entity {0} is not in the cache")]
    Missing(EntityRef),
    /// A referenced entity was deleted.
    #[error("entity {0} was deleted")]
    Gone(EntityRef),
    /// An entity is reachable from itself; the value would be infinite.
    #[error("entity {0} references itself")]
    Cycle(EntityRef),
    /// No result is recorded for the request key.
    #[error("no result recorded for {0}")]
    NoResult(RequestKey),
    /// A reference names an unregistered schema.
    #[error("unknown schema `{0}`")]
    UnknownSchema(EntityType),
    /// The denormalized JSON did not construct the requested type.
    #[error("could not construct value: {0}")]
    Construct(String),
}

impl DenormalizeError {
    /// `true` for conditions a pending or future fetch can resolve.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Missing(_) | Self::NoResult(_))
    }
}

/// Outcome of an entity lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Stored fields.
    Found(&'a Map<String, Value>),
    /// Never stored, or invalidated.
    Missing,
    /// Deleted.
    Gone,
}

/// Read port over normalized entity records.
pub trait EntitySource {
    /// Look up one entity's stored fields.
    fn lookup(&self, entity: &EntityRef) -> Lookup<'_>;
}

impl EntitySource for EntityBatch {
    fn lookup(&self, entity: &EntityRef) -> Lookup<'_> {
        self.get(entity).map_or(Lookup::Missing, Lookup::Found)
    }
}

/// Reconstruct the JSON value described by `descriptor`.
///
/// # Errors
///
/// See [`DenormalizeError`]; nothing partial is ever returned.
pub fn denormalize<S>(
    registry: &SchemaRegistry,
    descriptor: &ResultDescriptor,
    source: &S,
) -> Result<Value, DenormalizeError>
where
    S: EntitySource + ?Sized,
{
    Denormalizer {
        registry,
        source,
        path: Vec::new(),
    }
    .descriptor(descriptor)
}

/// Reconstruct and deserialize into `T`.
///
/// # Errors
///
/// As [`denormalize`], plus [`DenormalizeError::Construct`] when `T` rejects
/// the value.
pub fn denormalize_as<T, S>(
    registry: &SchemaRegistry,
    descriptor: &ResultDescriptor,
    source: &S,
) -> Result<T, DenormalizeError>
where
    T: DeserializeOwned,
    S: EntitySource + ?Sized,
{
    let value = denormalize(registry, descriptor, source)?;
    serde_json::from_value(value).map_err(|err| DenormalizeError::Construct(err.to_string()))
}

/// Reconstruct one entity as a typed resource.
///
/// # Errors
///
/// As [`denormalize`], plus [`DenormalizeError::Construct`].
pub fn denormalize_resource<R, S>(
    registry: &SchemaRegistry,
    id: &EntityId,
    source: &S,
) -> Result<R, DenormalizeError>
where
    R: Resource,
    S: EntitySource + ?Sized,
{
    let descriptor = ResultDescriptor::Ref(EntityRef::new(R::ENTITY_TYPE, id.clone()));
    denormalize_as(registry, &descriptor, source)
}

struct Denormalizer<'a, S: ?Sized> {
    registry: &'a SchemaRegistry,
    source: &'a S,
    // entities currently being expanded, outermost first
    path: Vec<EntityRef>,
}

impl<S: EntitySource + ?Sized> Denormalizer<'_, S> {
    fn descriptor(&mut self, descriptor: &ResultDescriptor) -> Result<Value, DenormalizeError> {
        match descriptor {
            ResultDescriptor::Null => Ok(Value::Null),
            ResultDescriptor::Verbatim(value) => Ok(value.clone()),
            ResultDescriptor::Ref(entity) => self.entity(entity),
            ResultDescriptor::Array(items) => items
                .iter()
                .map(|item| self.descriptor(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            ResultDescriptor::Object(fields) => {
                let mut out = Map::new();
                for (field, item) in fields {
                    out.insert(field.clone(), self.descriptor(item)?);
                }
                Ok(Value::Object(out))
            }
        }
    }

    fn entity(&mut self, entity: &EntityRef) -> Result<Value, DenormalizeError> {
        if self.path.contains(entity) {
            return Err(DenormalizeError::Cycle(entity.clone()));
        }
        let (registry, source) = (self.registry, self.source);
        let schema = registry
            .get(&entity.entity_type)
            .ok_or_else(|| DenormalizeError::UnknownSchema(entity.entity_type.clone()))?;
        let stored = match source.lookup(entity) {
            Lookup::Found(fields) => fields,
            Lookup::Missing => return Err(DenormalizeError::Missing(entity.clone())),
            Lookup::Gone => return Err(DenormalizeError::Gone(entity.clone())),
        };

        self.path.push(entity.clone());
        let mut out = stored.clone();
        for (field, shape) in schema.fields() {
            if let Some(nested) = stored.get(field) {
                let expanded = self.stored(shape, nested)?;
                out.insert(field.clone(), expanded);
            }
        }
        self.path.pop();
        Ok(Value::Object(out))
    }

    fn stored(&mut self, shape: &Shape, value: &Value) -> Result<Value, DenormalizeError> {
        match (shape, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Shape::Entity(name), Value::String(_) | Value::Number(_)) => {
                EntityId::from_json(value).map_or_else(
                    || Ok(value.clone()),
                    |id| self.entity(&EntityRef::new(name.clone(), id)),
                )
            }
            (Shape::Array(inner), Value::Array(items)) => items
                .iter()
                .map(|item| self.stored(inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Shape::Object(declared), Value::Object(fields)) => {
                let mut out = Map::new();
                for (field, item) in fields {
                    let expanded = match declared.get(field) {
                        Some(inner) => self.stored(inner, item)?,
                        None => item.clone(),
                    };
                    out.insert(field.clone(), expanded);
                }
                Ok(Value::Object(out))
            }
            (Shape::Values(inner), Value::Object(fields)) => {
                let mut out = Map::new();
                for (field, item) in fields {
                    out.insert(field.clone(), self.stored(inner, item)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(value.clone()),
        }
    }
}
