// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! [`FetchManager`] bound to a [`Transport`], driven by [`Endpoint`]s.

use std::sync::Arc;

use normcache_core::{denormalize_as, EntityRef, RequestKey};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FetchError, ReadError};
use crate::manager::{FetchHandle, FetchManager};
use crate::request::Endpoint;
use crate::transport::Transport;

/// Endpoint-level API over a manager and a transport.
#[derive(Debug)]
pub struct FetchClient<T> {
    manager: FetchManager,
    transport: Arc<T>,
}

impl<T> Clone for FetchClient<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> FetchClient<T> {
    /// Bind `manager` to `transport`.
    pub fn new(manager: FetchManager, transport: T) -> Self {
        Self::from_arc(manager, Arc::new(transport))
    }

    /// Bind `manager` to a shared transport.
    pub fn from_arc(manager: FetchManager, transport: Arc<T>) -> Self {
        Self { manager, transport }
    }

    /// The underlying manager.
    pub fn manager(&self) -> &FetchManager {
        &self.manager
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `true` while the request for `endpoint` and `params` is in flight.
    pub fn is_pending(&self, endpoint: &Endpoint, params: Option<&Value>) -> bool {
        endpoint
            .request_key(params)
            .is_some_and(|key| self.manager.is_pending(&key))
    }

    /// Start (or join) the fetch without waiting.
    ///
    /// # Panics
    ///
    /// Outside a tokio runtime, when this call leads the request.
    pub fn start(&self, endpoint: &Endpoint, params: Option<Value>) -> FetchHandle {
        let key = endpoint.request_key(params.as_ref());
        let request = endpoint.transport_request(params.unwrap_or(Value::Null), None);
        let transport = Arc::clone(&self.transport);
        self.manager
            .start(key, endpoint.shape().clone(), move || transport.execute(request))
    }

    /// Fetch `endpoint` with `params` into the cache.
    ///
    /// `params` of `None` or `null` is a no-op resolving to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// See [`FetchError`].
    pub async fn fetch(
        &self,
        endpoint: &Endpoint,
        params: Option<Value>,
    ) -> Result<Option<RequestKey>, FetchError> {
        self.start(endpoint, params).wait().await
    }

    /// Fetch, then rebuild the result as `R` from the cache.
    ///
    /// # Errors
    ///
    /// [`ReadError::Fetch`] or [`ReadError::Denormalize`].
    pub async fn read<R: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        params: Option<Value>,
    ) -> Result<Option<R>, ReadError> {
        let Some(key) = self.fetch(endpoint, params).await? else {
            return Ok(None);
        };
        let cache = self.manager.cache().read();
        Ok(Some(cache.denormalize_result(self.manager.registry(), &key)?))
    }

    /// Fetch several endpoints concurrently.
    ///
    /// Every request is started before any is awaited; outcomes come back in
    /// input order.
    pub async fn fetch_all(
        &self,
        requests: Vec<(&Endpoint, Option<Value>)>,
    ) -> Vec<Result<Option<RequestKey>, FetchError>> {
        let handles: Vec<FetchHandle> = requests
            .into_iter()
            .map(|(endpoint, params)| self.start(endpoint, params))
            .collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.wait().await);
        }
        outcomes
    }

    /// Send `body` to a mutating endpoint and commit the returned entities.
    ///
    /// Returns the response rebuilt from the cache after the commit; use
    /// `R = Value` for plain JSON.
    ///
    /// # Errors
    ///
    /// [`ReadError::Fetch`] if the request fails, [`ReadError::Denormalize`]
    /// if the committed response cannot be rebuilt.
    pub async fn mutate<R: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        params: Option<Value>,
        body: Value,
    ) -> Result<R, ReadError> {
        let request = endpoint.transport_request(params.unwrap_or(Value::Null), Some(body));
        let descriptor = self
            .manager
            .mutate(endpoint.shape(), self.transport.execute(request))
            .await?;
        let cache = self.manager.cache().read();
        Ok(denormalize_as(self.manager.registry(), &descriptor, &*cache)?)
    }

    /// Delete `target` through `endpoint`, then purge it from the cache.
    ///
    /// # Errors
    ///
    /// See [`FetchManager::delete`].
    pub async fn delete(
        &self,
        endpoint: &Endpoint,
        params: Option<Value>,
        target: &EntityRef,
    ) -> Result<(), FetchError> {
        let request = endpoint.transport_request(params.unwrap_or(Value::Null), None);
        self.manager
            .delete(target, self.transport.execute(request))
            .await
    }
}
