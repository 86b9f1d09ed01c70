// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request orchestration: dedup, validation, normalization, commit.
//!
//! [`FetchManager::start`] consults the [`InFlightTable`]. A leader calls the
//! executor and hands the resulting future to a spawned task; that task owns
//! the rest of the pipeline (validate, normalize, commit, settle), so a caller
//! that stops waiting never cancels a request that is already on the wire.
//! Failures commit nothing.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use normcache_core::{
    denormalize, normalize, EntityRef, ResultDescriptor, RequestKey, SchemaRegistry, Shape,
    SharedCache,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{FetchError, JSON_EXPECTED};
use crate::inflight::{Begin, InFlightTable, KeyState, Waiter};
use crate::transport::{decode_response, NetworkError, RawResponse};

/// A started fetch.
#[derive(Debug)]
pub enum FetchHandle {
    /// Nothing to wait for: no key, or the result is still fresh.
    Ready(Option<RequestKey>),
    /// Settles when the request for this key does.
    Waiting(Waiter),
}

impl FetchHandle {
    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// The [`FetchError`] the request settled with.
    pub async fn wait(self) -> Result<Option<RequestKey>, FetchError> {
        match self {
            Self::Ready(key) => Ok(key),
            Self::Waiting(waiter) => waiter.wait().await.map(Some),
        }
    }
}

#[derive(Debug, Default)]
struct Tracking {
    inflight: InFlightTable,
    fetched_at: FxHashMap<RequestKey, Instant>,
}

#[derive(Debug)]
struct Shared {
    cache: SharedCache,
    registry: Arc<SchemaRegistry>,
    config: FetchConfig,
    tracking: Mutex<Tracking>,
}

impl Shared {
    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Stale entries are dropped here, so the map only holds live windows.
    fn is_fresh(&self, tracking: &mut Tracking, key: &RequestKey) -> bool {
        let ttl = self.config.result_ttl();
        let Some(at) = tracking.fetched_at.get(key) else {
            return false;
        };
        let fresh = at.elapsed() < ttl && self.is_complete(key);
        if !fresh {
            tracking.fetched_at.remove(key);
        }
        fresh
    }

    /// `false` when the recorded result is gone or something it references
    /// was invalidated.
    fn is_complete(&self, key: &RequestKey) -> bool {
        let cache = self.cache.read();
        cache.result(key).is_some_and(|record| {
            !matches!(
                denormalize(&self.registry, record.descriptor(), &*cache),
                Err(err) if err.is_incomplete()
            )
        })
    }

    fn parse(&self, response: RawResponse, shape: &Shape) -> Result<Value, FetchError> {
        decode_response(response, true)?
            .ok_or_else(|| FetchError::PayloadShape(JSON_EXPECTED.to_owned()))
            .and_then(|value| {
                if value.is_null() && shape.expects_structure() {
                    Err(FetchError::PayloadShape(JSON_EXPECTED.to_owned()))
                } else {
                    Ok(value)
                }
            })
    }

    fn absorb(
        &self,
        key: &RequestKey,
        shape: &Shape,
        response: RawResponse,
    ) -> Result<(), FetchError> {
        let value = self.parse(response, shape)?;
        let normalized = normalize(&self.registry, shape, &value)?;
        let count = normalized.entities.len();
        let revision = self
            .cache
            .commit(normalized.entities, Some((key.clone(), normalized.result)));
        debug!(%key, %revision, entities = count, "fetch committed");
        Ok(())
    }

    fn settle(&self, key: &RequestKey, outcome: Result<(), FetchError>) {
        let ttl = self.config.result_ttl();
        let mut tracking = self.tracking();
        tracking.fetched_at.retain(|_, at| at.elapsed() < ttl);
        match outcome {
            Ok(()) => {
                if !ttl.is_zero() {
                    tracking.fetched_at.insert(key.clone(), Instant::now());
                }
                tracking.inflight.settle(key, Ok(key.clone()));
            }
            Err(err) => {
                tracking.fetched_at.remove(key);
                tracking.inflight.settle(key, Err(err));
            }
        }
    }
}

/// Settles a key with [`FetchError::Abandoned`] if its task ends without
/// settling (panic, runtime shutdown).
struct SettleGuard {
    shared: Arc<Shared>,
    key: Option<RequestKey>,
}

impl SettleGuard {
    fn settle(mut self, outcome: Result<(), FetchError>) {
        if let Some(key) = self.key.take() {
            self.shared.settle(&key, outcome);
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            warn!(%key, "fetch task ended without settling");
            self.shared.settle(&key, Err(FetchError::Abandoned));
        }
    }
}

/// Deduplicating fetch orchestrator bound to one cache.
///
/// Cheap to clone; clones share the cache and the in-flight table.
#[derive(Debug, Clone)]
pub struct FetchManager {
    shared: Arc<Shared>,
}

impl FetchManager {
    /// Manager over `cache` with default settings.
    pub fn new(cache: SharedCache, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(cache, registry, FetchConfig::default())
    }

    /// Manager over `cache` with explicit settings.
    pub fn with_config(
        cache: SharedCache,
        registry: Arc<SchemaRegistry>,
        config: FetchConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                registry,
                config,
                tracking: Mutex::new(Tracking::default()),
            }),
        }
    }

    /// The cache fetched data lands in.
    pub fn cache(&self) -> &SharedCache {
        &self.shared.cache
    }

    /// Schemas used for normalization.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    /// Active settings.
    pub fn config(&self) -> FetchConfig {
        self.shared.config
    }

    /// `true` while a request for `key` is in flight.
    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.shared.tracking().inflight.state(key) == KeyState::Pending
    }

    /// Start (or join) the fetch for `key`.
    ///
    /// `executor` is only called when this caller leads the request. With
    /// `key == None` nothing happens and the handle is ready with `None`.
    ///
    /// # Panics
    ///
    /// When leading a request outside a tokio runtime.
    pub fn start<F, Fut>(
        &self,
        key: Option<RequestKey>,
        shape: Shape,
        executor: F,
    ) -> FetchHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RawResponse, NetworkError>> + Send + 'static,
    {
        let Some(key) = key else {
            return FetchHandle::Ready(None);
        };
        let waiter = {
            let mut tracking = self.shared.tracking();
            if self.shared.is_fresh(&mut tracking, &key) {
                debug!(%key, "result still fresh; skipping request");
                return FetchHandle::Ready(Some(key));
            }
            match tracking.inflight.begin(&key) {
                Begin::Follower(waiter) => {
                    debug!(%key, "joined in-flight request");
                    return FetchHandle::Waiting(waiter);
                }
                Begin::Leader(waiter) => waiter,
            }
        };
        let guard = SettleGuard {
            shared: Arc::clone(&self.shared),
            key: Some(key.clone()),
        };
        let request = executor();
        tokio::spawn(async move {
            let shared = Arc::clone(&guard.shared);
            let outcome = request
                .await
                .map_err(FetchError::from)
                .and_then(|response| shared.absorb(&key, &shape, response));
            if let Err(err) = &outcome {
                warn!(%key, ?err, "fetch failed");
            }
            guard.settle(outcome);
        });
        FetchHandle::Waiting(waiter)
    }

    /// Fetch `key` and wait for it to settle.
    ///
    /// Resolves with the key whose result is now in the cache, or `None` when
    /// there was nothing to fetch.
    ///
    /// # Errors
    ///
    /// See [`FetchError`]. Every caller sharing the request sees the same one.
    pub async fn fetch<F, Fut>(
        &self,
        key: Option<RequestKey>,
        shape: Shape,
        executor: F,
    ) -> Result<Option<RequestKey>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RawResponse, NetworkError>> + Send + 'static,
    {
        self.start(key, shape, executor).wait().await
    }

    /// Run a mutation and commit the entities in its response.
    ///
    /// Mutations are never deduplicated and record no result. Returns the
    /// response skeleton so callers can rebuild it from the cache.
    ///
    /// # Errors
    ///
    /// As [`fetch`](Self::fetch), minus [`FetchError::Abandoned`].
    pub async fn mutate<Fut>(
        &self,
        shape: &Shape,
        request: Fut,
    ) -> Result<ResultDescriptor, FetchError>
    where
        Fut: Future<Output = Result<RawResponse, NetworkError>>,
    {
        let outcome = async {
            let value = self.shared.parse(request.await?, shape)?;
            let normalized = normalize(&self.shared.registry, shape, &value)?;
            let revision = self.shared.cache.commit(normalized.entities, None);
            debug!(%revision, "mutation committed");
            Ok::<_, FetchError>(normalized.result)
        }
        .await;
        if let Err(err) = &outcome {
            warn!(?err, "mutation failed");
        }
        outcome
    }

    /// Run a delete and purge `target` from the cache on success.
    ///
    /// An empty body (e.g. `204 No Content`) is accepted.
    ///
    /// # Errors
    ///
    /// [`FetchError::Transport`] or [`FetchError::Network`]; the cache is
    /// untouched on failure.
    pub async fn delete<Fut>(&self, target: &EntityRef, request: Fut) -> Result<(), FetchError>
    where
        Fut: Future<Output = Result<RawResponse, NetworkError>>,
    {
        let outcome = request
            .await
            .map_err(FetchError::from)
            .and_then(|response| decode_response(response, false).map(drop));
        match outcome {
            Ok(()) => {
                self.shared.cache.write().purge(target);
                debug!(%target, "delete committed");
                Ok(())
            }
            Err(err) => {
                warn!(%target, ?err, "delete failed");
                Err(err)
            }
        }
    }
}
