// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declarative entity schemas and the registry that resolves them by name.
//!
//! A [`Schema`] describes one entity type: how to pull its identifier out of a
//! raw JSON object and which of its fields hold nested entities. Nested
//! schemas are named, never embedded: a field declared as
//! `Shape::entity("user")` is resolved through the [`SchemaRegistry`] each time
//! the normalizer or denormalizer reaches it. Self-referential types (a
//! comment whose `parent` is another comment) therefore cost nothing extra.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ident::{EntityId, EntityRef, EntityType};

/// Key extraction function: raw entity fields → identifier.
///
/// Must be pure, and stable for the lifetime of the entity.
pub type KeyFn = Arc<dyn Fn(&Map<String, Value>) -> Option<EntityId> + Send + Sync>;

/// Errors raised while declaring or registering schemas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A schema with this type tag is already registered.
    #[error("schema `{0}` is already registered")]
    Duplicate(EntityType),
    /// A field (or endpoint shape) names a schema the registry does not hold.
    #[error("schema `{from}` field `{field}` references unknown schema `{target}`")]
    DanglingReference {
        /// Schema declaring the field (`<endpoint>` for endpoint shapes).
        from: String,
        /// Offending field.
        field: String,
        /// The unresolved type tag.
        target: EntityType,
    },
    /// The key extractor could not produce an id from the declared example.
    #[error("schema `{0}` key extractor failed on its example payload")]
    KeyProbeFailed(EntityType),
    /// The declared example is not a JSON object.
    #[error("schema `{0}` example must be a JSON object")]
    ExampleNotObject(EntityType),
}

/// Shape of a JSON value relative to the registered schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Opaque value kept verbatim.
    Scalar,
    /// One entity of the named type.
    Entity(EntityType),
    /// A list whose elements share one shape.
    Array(Box<Shape>),
    /// A plain object with per-field shapes; undeclared fields pass through.
    Object(BTreeMap<String, Shape>),
    /// A map from arbitrary keys to values of one shape.
    Values(Box<Shape>),
}

impl Shape {
    /// One entity of type `name`.
    pub fn entity(name: impl Into<EntityType>) -> Self {
        Self::Entity(name.into())
    }

    /// A list of `inner`.
    pub fn array_of(inner: Self) -> Self {
        Self::Array(Box::new(inner))
    }

    /// A map of arbitrary keys to `inner`.
    pub fn values_of(inner: Self) -> Self {
        Self::Values(Box::new(inner))
    }

    /// A plain object with the given field shapes.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// `true` when a response of this shape must be a JSON object or array.
    pub fn expects_structure(&self) -> bool {
        !matches!(self, Self::Scalar)
    }

    fn visit_entities<'a>(&'a self, out: &mut Vec<&'a EntityType>) {
        match self {
            Self::Scalar => {}
            Self::Entity(name) => out.push(name),
            Self::Array(inner) | Self::Values(inner) => inner.visit_entities(out),
            Self::Object(fields) => fields.values().for_each(|s| s.visit_entities(out)),
        }
    }
}

/// Schema for one entity type.
#[derive(Clone)]
pub struct Schema {
    entity_type: EntityType,
    key: KeyFn,
    fields: BTreeMap<String, Shape>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("entity_type", &self.entity_type)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl Schema {
    /// Start declaring a schema for `entity_type` (keyed by `"id"` unless
    /// overridden).
    pub fn builder(entity_type: impl Into<EntityType>) -> SchemaBuilder {
        SchemaBuilder {
            entity_type: entity_type.into(),
            key: None,
            fields: BTreeMap::new(),
            example: None,
        }
    }

    /// Type tag.
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Declared nested fields.
    pub fn fields(&self) -> &BTreeMap<String, Shape> {
        &self.fields
    }

    /// Shape of one declared field, if any.
    pub fn field(&self, name: &str) -> Option<&Shape> {
        self.fields.get(name)
    }

    /// Run the key extractor against raw entity fields.
    pub fn extract_key(&self, fields: &Map<String, Value>) -> Option<EntityId> {
        (self.key)(fields)
    }

    /// Reference for the entity described by `fields`, if it has a key.
    pub fn entity_ref(&self, fields: &Map<String, Value>) -> Option<EntityRef> {
        self.extract_key(fields).map(|id| EntityRef {
            entity_type: self.entity_type.clone(),
            id,
        })
    }
}

/// Builder for [`Schema`]; validates the key extractor in [`build`](Self::build).
pub struct SchemaBuilder {
    entity_type: EntityType,
    key: Option<KeyFn>,
    fields: BTreeMap<String, Shape>,
    example: Option<Value>,
}

impl SchemaBuilder {
    /// Key entities by the value of `field`.
    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.key = Some(Arc::new(move |fields: &Map<String, Value>| {
            fields.get(&field).and_then(EntityId::from_json)
        }));
        self
    }

    /// Key entities with a custom extractor.
    pub fn key_with<F>(mut self, key: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Option<EntityId> + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(key));
        self
    }

    /// Declare a nested field.
    pub fn field(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.insert(name.into(), shape);
        self
    }

    /// Minimal example payload the key extractor is probed against.
    pub fn example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    /// Finish the schema.
    ///
    /// # Errors
    ///
    /// [`SchemaError::ExampleNotObject`] or [`SchemaError::KeyProbeFailed`]
    /// when an example was declared and the key extractor cannot run on it.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let schema = Schema {
            key: self.key.unwrap_or_else(Self::default_key),
            entity_type: self.entity_type,
            fields: self.fields,
        };
        if let Some(example) = self.example {
            let Value::Object(fields) = example else {
                return Err(SchemaError::ExampleNotObject(schema.entity_type));
            };
            if schema.extract_key(&fields).is_none() {
                return Err(SchemaError::KeyProbeFailed(schema.entity_type));
            }
        }
        Ok(schema)
    }

    fn default_key() -> KeyFn {
        Arc::new(|fields: &Map<String, Value>| fields.get("id").and_then(EntityId::from_json))
    }
}

/// Typed view over one entity schema.
///
/// Construction is serde: `Deserialize` builds the value from fully
/// denormalized JSON and `Serialize` turns it back into raw fields. Nested
/// resources go through their own `Deserialize`, so custom conversion
/// (`deserialize_with`, `#[serde(from = ...)]`) applies at every depth.
pub trait Resource: Serialize + DeserializeOwned {
    /// Type tag of the backing schema.
    const ENTITY_TYPE: &'static str;

    /// Schema declaration for this resource.
    fn schema() -> SchemaBuilder {
        Schema::builder(Self::ENTITY_TYPE)
    }
}

/// Application-supplied set of schemas, looked up by type tag.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<EntityType, Arc<Schema>>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schema.
    ///
    /// # Errors
    ///
    /// [`SchemaError::Duplicate`] if the type tag is taken.
    pub fn register(&mut self, schema: Schema) -> Result<(), SchemaError> {
        if self.schemas.contains_key(schema.entity_type()) {
            return Err(SchemaError::Duplicate(schema.entity_type.clone()));
        }
        self.schemas
            .insert(schema.entity_type.clone(), Arc::new(schema));
        Ok(())
    }

    /// Build and add the schema declared by `R`.
    ///
    /// # Errors
    ///
    /// Whatever [`SchemaBuilder::build`] or [`register`](Self::register) reports.
    pub fn register_resource<R: Resource>(&mut self) -> Result<(), SchemaError> {
        self.register(R::schema().build()?)
    }

    /// Chaining form of [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// [`SchemaError::Duplicate`] if the type tag is taken.
    pub fn with(mut self, schema: Schema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Look up a schema by type tag.
    pub fn get(&self, entity_type: &EntityType) -> Option<&Schema> {
        self.schemas.get(entity_type).map(AsRef::as_ref)
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Check that every schema reference in every field resolves.
    ///
    /// References are resolved lazily during traversal, so registration order
    /// does not matter; call this once the registry is complete.
    ///
    /// # Errors
    ///
    /// The first [`SchemaError::DanglingReference`] found, in type-tag order.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for schema in self.schemas.values() {
            for (field, shape) in schema.fields() {
                self.check_shape(schema.entity_type().as_str(), field, shape)?;
            }
        }
        Ok(())
    }

    /// Check that an endpoint's response shape only names registered schemas.
    ///
    /// # Errors
    ///
    /// [`SchemaError::DanglingReference`] with `from = "<endpoint>"`.
    pub fn validate_shape(&self, shape: &Shape) -> Result<(), SchemaError> {
        self.check_shape("<endpoint>", "<response>", shape)
    }

    fn check_shape(&self, from: &str, field: &str, shape: &Shape) -> Result<(), SchemaError> {
        let mut names = Vec::new();
        shape.visit_entities(&mut names);
        names
            .into_iter()
            .find(|name| !self.schemas.contains_key(*name))
            .map_or(Ok(()), |target| {
                Err(SchemaError::DanglingReference {
                    from: from.to_owned(),
                    field: field.to_owned(),
                    target: target.clone(),
                })
            })
    }
}
