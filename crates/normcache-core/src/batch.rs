// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flat entity maps produced by normalization, and the field merge rule.
//!
//! # Merge Rule
//!
//! Merging `incoming` into `existing` is a shallow, field-by-field overwrite:
//! every field present in `incoming` (including an explicit `null`) replaces
//! the existing value, and every field absent from `incoming` is kept. A
//! nested reference that only carries `id` + `username` therefore never erases
//! a previously known `email`. Merging the same fields twice is a no-op.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::ident::EntityRef;

/// Merge `incoming` into `existing`. Returns `true` if anything changed.
pub fn merge_fields(existing: &mut Map<String, Value>, incoming: Map<String, Value>) -> bool {
    let mut changed = false;
    for (field, value) in incoming {
        match existing.get_mut(&field) {
            Some(current) if *current == value => {}
            Some(current) => {
                *current = value;
                changed = true;
            }
            None => {
                existing.insert(field, value);
                changed = true;
            }
        }
    }
    changed
}

/// Entities extracted from one payload, keyed by `(type, id)`.
///
/// Iteration order is sorted by [`EntityRef`]; commits are deterministic
/// regardless of the order entities appeared in the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityBatch {
    records: BTreeMap<EntityRef, Map<String, Value>>,
}

impl EntityBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, merging with any earlier occurrence of the same entity.
    pub fn insert(&mut self, entity: EntityRef, fields: Map<String, Value>) {
        match self.records.entry(entity) {
            Entry::Occupied(mut existing) => {
                merge_fields(existing.get_mut(), fields);
            }
            Entry::Vacant(slot) => {
                slot.insert(fields);
            }
        }
    }

    /// Fields recorded for `entity`.
    pub fn get(&self, entity: &EntityRef) -> Option<&Map<String, Value>> {
        self.records.get(entity)
    }

    /// Number of distinct entities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` if no entity was extracted.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in reference order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityRef, &Map<String, Value>)> {
        self.records.iter()
    }

    /// Fold another batch into this one (later batch wins per field).
    pub fn extend(&mut self, other: Self) {
        for (entity, fields) in other {
            self.insert(entity, fields);
        }
    }
}

impl<'a> IntoIterator for &'a EntityBatch {
    type Item = (&'a EntityRef, &'a Map<String, Value>);
    type IntoIter = std::collections::btree_map::Iter<'a, EntityRef, Map<String, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for EntityBatch {
    type Item = (EntityRef, Map<String, Value>);
    type IntoIter = std::collections::btree_map::IntoIter<EntityRef, Map<String, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
