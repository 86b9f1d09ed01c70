// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The long-lived normalized entity store.
//!
//! [`NormalizedCache`] owns two maps: entities (`type → id → record`) and
//! results (`request key → descriptor`). The only way in is
//! [`commit`](NormalizedCache::commit) (plus the explicit invalidation and
//! purge calls), so every write goes through the field merge rule described
//! in [`crate::batch`].
//!
//! # Ordering
//!
//! Commits apply in call order. There is no staleness check: if two requests
//! touching the same entity settle out of order, the later commit wins field
//! by field. Callers that need to reject stale writes can compare
//! [`EntityMeta::updated`] revisions before committing.

use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::batch::{merge_fields, EntityBatch};
use crate::denormalize::{denormalize, denormalize_as, DenormalizeError, EntitySource, Lookup};
use crate::ident::{EntityId, EntityRef, EntityType, RequestKey, Revision};
use crate::normalize::ResultDescriptor;
use crate::schema::SchemaRegistry;

/// Per-entity bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMeta {
    /// Commit that first stored the entity.
    pub created: Revision,
    /// Last commit that changed any of its fields.
    pub updated: Revision,
}

/// One stored entity: plain field data plus metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    fields: Map<String, Value>,
    meta: EntityMeta,
}

impl EntityRecord {
    /// Stored fields (nested entities appear as ids).
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// One stored field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Metadata.
    pub fn meta(&self) -> EntityMeta {
        self.meta
    }
}

/// One stored result: the descriptor and the revision that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    descriptor: ResultDescriptor,
    updated: Revision,
}

impl ResultRecord {
    /// Result skeleton.
    pub fn descriptor(&self) -> &ResultDescriptor {
        &self.descriptor
    }

    /// Commit that recorded it.
    pub fn updated(&self) -> Revision {
        self.updated
    }
}

/// In-memory normalized store.
///
/// Construct as many as needed; there is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct NormalizedCache {
    entities: FxHashMap<EntityType, FxHashMap<EntityId, EntityRecord>>,
    tombstones: FxHashSet<EntityRef>,
    results: FxHashMap<RequestKey, ResultRecord>,
    revision: Revision,
}

impl NormalizedCache {
    /// Empty cache at [`Revision(0)`](Revision).
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `entities` and, if given, record `result` under its key.
    ///
    /// Merging cannot fail, so a commit always applies in full. Returns the
    /// new revision.
    pub fn commit(
        &mut self,
        entities: EntityBatch,
        result: Option<(RequestKey, ResultDescriptor)>,
    ) -> Revision {
        let revision = self.revision.next();
        let mut inserted = 0usize;
        let mut changed = 0usize;
        for (entity, fields) in entities {
            self.tombstones.remove(&entity);
            let bucket = self.entities.entry(entity.entity_type.clone()).or_default();
            match bucket.entry(entity.id.clone()) {
                Entry::Occupied(mut slot) => {
                    let record = slot.get_mut();
                    if merge_fields(&mut record.fields, fields) {
                        record.meta.updated = revision;
                        changed += 1;
                        trace!(%entity, %revision, "merged entity");
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(EntityRecord {
                        fields,
                        meta: EntityMeta {
                            created: revision,
                            updated: revision,
                        },
                    });
                    inserted += 1;
                }
            }
        }
        if let Some((key, descriptor)) = result {
            debug!(%key, %revision, "recorded result");
            self.results.insert(
                key,
                ResultRecord {
                    descriptor,
                    updated: revision,
                },
            );
        }
        debug!(%revision, inserted, changed, "commit applied");
        self.revision = revision;
        revision
    }

    /// Current revision (number of mutations applied so far).
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Look up one entity.
    pub fn entity(&self, entity: &EntityRef) -> Option<&EntityRecord> {
        self.get_entity(&entity.entity_type, &entity.id)
    }

    /// Look up one entity by parts.
    pub fn get_entity(&self, entity_type: &EntityType, id: &EntityId) -> Option<&EntityRecord> {
        self.entities.get(entity_type).and_then(|bucket| bucket.get(id))
    }

    /// Iterate every stored entity of one type (unordered).
    pub fn entities_of<'a>(
        &'a self,
        entity_type: &EntityType,
    ) -> impl Iterator<Item = (&'a EntityId, &'a EntityRecord)> + 'a {
        self.entities
            .get(entity_type)
            .into_iter()
            .flatten()
    }

    /// Look up the result recorded for `key`.
    pub fn result(&self, key: &RequestKey) -> Option<&ResultRecord> {
        self.results.get(key)
    }

    /// `true` if the entity was purged and not re-committed since.
    pub fn is_gone(&self, entity: &EntityRef) -> bool {
        self.tombstones.contains(entity)
    }

    /// Total number of stored entities.
    pub fn entity_count(&self) -> usize {
        self.entities.values().map(FxHashMap::len).sum()
    }

    /// Number of stored results.
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Drop one entity; later reads report it missing.
    pub fn invalidate(&mut self, entity: &EntityRef) -> bool {
        let removed = self
            .entities
            .get_mut(&entity.entity_type)
            .and_then(|bucket| bucket.remove(&entity.id))
            .is_some();
        if removed {
            self.bump();
            debug!(%entity, "invalidated entity");
        }
        removed
    }

    /// Drop every entity of one type. Returns how many were removed.
    pub fn invalidate_type(&mut self, entity_type: &EntityType) -> usize {
        let removed = self
            .entities
            .remove(entity_type)
            .unwrap_or_default()
            .len();
        if removed > 0 {
            self.bump();
            debug!(%entity_type, removed, "invalidated entity type");
        }
        removed
    }

    /// Drop the result recorded for `key`.
    pub fn invalidate_result(&mut self, key: &RequestKey) -> bool {
        let removed = self.results.remove(key).is_some();
        if removed {
            self.bump();
            debug!(%key, "invalidated result");
        }
        removed
    }

    /// Remove a deleted entity and remember the deletion.
    ///
    /// Reads of the entity report [`DenormalizeError::Gone`] until a later
    /// commit stores it again.
    pub fn purge(&mut self, entity: &EntityRef) -> bool {
        let removed = self
            .entities
            .get_mut(&entity.entity_type)
            .and_then(|bucket| bucket.remove(&entity.id))
            .is_some();
        self.tombstones.insert(entity.clone());
        self.bump();
        debug!(%entity, removed, "purged entity");
        removed
    }

    /// Denormalize the result recorded for `key` into JSON.
    ///
    /// # Errors
    ///
    /// [`DenormalizeError::NoResult`] if no result is recorded, otherwise as
    /// [`denormalize`].
    pub fn denormalize_value(
        &self,
        registry: &SchemaRegistry,
        key: &RequestKey,
    ) -> Result<Value, DenormalizeError> {
        let record = self
            .result(key)
            .ok_or_else(|| DenormalizeError::NoResult(key.clone()))?;
        denormalize(registry, record.descriptor(), self)
    }

    /// Denormalize the result recorded for `key` into `T`.
    ///
    /// # Errors
    ///
    /// As [`denormalize_value`](Self::denormalize_value), plus
    /// [`DenormalizeError::Construct`].
    pub fn denormalize_result<T: DeserializeOwned>(
        &self,
        registry: &SchemaRegistry,
        key: &RequestKey,
    ) -> Result<T, DenormalizeError> {
        let record = self
            .result(key)
            .ok_or_else(|| DenormalizeError::NoResult(key.clone()))?;
        denormalize_as(registry, record.descriptor(), self)
    }

    fn bump(&mut self) {
        self.revision = self.revision.next();
    }
}

impl EntitySource for NormalizedCache {
    fn lookup(&self, entity: &EntityRef) -> Lookup<'_> {
        self.entity(entity).map_or_else(
            || {
                if self.is_gone(entity) {
                    Lookup::Gone
                } else {
                    Lookup::Missing
                }
            },
            |record| Lookup::Found(record.fields()),
        )
    }
}

/// Cloneable handle to a cache shared between readers and the fetch layer.
///
/// Guards are short-lived: nothing in this workspace holds one across an
/// `.await`. A poisoned lock is recovered, since every mutation either
/// completes or never started.
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    inner: Arc<RwLock<NormalizedCache>>,
}

impl SharedCache {
    /// Share a fresh, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing cache.
    pub fn from_cache(cache: NormalizedCache) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cache)),
        }
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, NormalizedCache> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, NormalizedCache> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit under the write lock.
    pub fn commit(
        &self,
        entities: EntityBatch,
        result: Option<(RequestKey, ResultDescriptor)>,
    ) -> Revision {
        self.write().commit(entities, result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(entries: &[(&str, &str, Value)]) -> EntityBatch {
        let mut batch = EntityBatch::new();
        for (ty, id, fields) in entries {
            batch.insert(
                EntityRef::new(*ty, *id),
                fields.as_object().unwrap().clone(),
            );
        }
        batch
    }

    #[test]
    fn partial_commits_merge_field_by_field() {
        let mut cache = NormalizedCache::new();
        cache.commit(batch(&[("user", "1", json!({"id": 1, "username": "bob"}))]), None);
        cache.commit(
            batch(&[("user", "1", json!({"id": 1, "email": "bob@bob.com"}))]),
            None,
        );
        let user = cache.entity(&EntityRef::new("user", "1")).unwrap();
        assert_eq!(
            Value::Object(user.fields().clone()),
            json!({"id": 1, "username": "bob", "email": "bob@bob.com"})
        );
        assert_eq!(user.meta().created, Revision(1));
        assert_eq!(user.meta().updated, Revision(2));
    }

    #[test]
    fn identical_commit_leaves_records_unchanged() {
        let mut cache = NormalizedCache::new();
        let data = batch(&[("user", "1", json!({"id": 1, "username": "bob"}))]);
        cache.commit(data.clone(), None);
        let before = cache.entity(&EntityRef::new("user", "1")).cloned();
        cache.commit(data, None);
        assert_eq!(cache.entity(&EntityRef::new("user", "1")).cloned(), before);
        assert_eq!(cache.entity_count(), 1);
    }

    #[test]
    fn invalidation_removes_data() {
        let mut cache = NormalizedCache::new();
        let key = RequestKey::new("GET /user/ null");
        cache.commit(
            batch(&[
                ("user", "1", json!({"id": 1})),
                ("user", "2", json!({"id": 2})),
                ("article", "5", json!({"id": 5})),
            ]),
            Some((
                key.clone(),
                ResultDescriptor::Ref(EntityRef::new("article", "5")),
            )),
        );
        assert!(cache.invalidate(&EntityRef::new("article", "5")));
        assert!(!cache.invalidate(&EntityRef::new("article", "5")));
        assert_eq!(cache.invalidate_type(&EntityType::new("user")), 2);
        assert_eq!(cache.entity_count(), 0);
        assert!(cache.invalidate_result(&key));
        assert!(cache.result(&key).is_none());
        assert_eq!(
            cache.lookup(&EntityRef::new("user", "1")),
            Lookup::Missing
        );
    }

    #[test]
    fn purge_leaves_tombstone_until_recommitted() {
        let mut cache = NormalizedCache::new();
        let article = EntityRef::new("article", "5");
        cache.commit(batch(&[("article", "5", json!({"id": 5}))]), None);
        assert!(cache.purge(&article));
        assert_eq!(cache.lookup(&article), Lookup::Gone);
        cache.commit(batch(&[("article", "5", json!({"id": 5, "title": "back"}))]), None);
        assert!(!cache.is_gone(&article));
        assert_eq!(
            cache.entity(&article).unwrap().field("title"),
            Some(&json!("back"))
        );
    }

    #[test]
    fn independent_caches_do_not_share_state() {
        let mut a = NormalizedCache::new();
        let b = NormalizedCache::new();
        a.commit(batch(&[("user", "1", json!({"id": 1}))]), None);
        assert_eq!(a.entity_count(), 1);
        assert_eq!(b.entity_count(), 0);
        assert_eq!(b.revision(), Revision(0));
    }

    #[test]
    fn missing_result_is_no_result() {
        let cache = NormalizedCache::new();
        let err = cache
            .denormalize_value(&SchemaRegistry::new(), &RequestKey::new("nope"))
            .unwrap_err();
        assert_eq!(err, DenormalizeError::NoResult(RequestKey::new("nope")));
    }

    #[test]
    fn shared_handles_see_the_same_cache() {
        let shared = SharedCache::new();
        let other = shared.clone();
        shared.commit(batch(&[("user", "1", json!({"id": 1}))]), None);
        assert_eq!(other.read().entity_count(), 1);
    }
}
