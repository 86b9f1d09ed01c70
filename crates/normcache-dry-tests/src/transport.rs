// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Route-table transport fake.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use normcache_fetch::{Method, NetworkError, RawResponse, Transport, TransportRequest};
use serde_json::Value;
use tokio::sync::watch;

/// [`Transport`] answering from canned replies.
///
/// A request is routed by method and URL, where the URL is the endpoint
/// followed by `params.id` when present (`http://test.com/article/` with
/// `{"id": 5}` routes to `http://test.com/article/5`). Unrouted requests fail
/// with a [`NetworkError`].
///
/// Calls are counted when `execute` is invoked, before the reply is
/// delivered. [`hold`](Self::hold) keeps every reply pending until
/// [`release`](Self::release).
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
    gate: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct Script {
    routes: BTreeMap<(Method, String), RawResponse>,
    calls: BTreeMap<(Method, String), usize>,
    log: Vec<TransportRequest>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Transport with no routes and the gate open.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::default(),
            gate: Arc::new(gate),
        }
    }

    /// Answer `method url` with `status` and `body`.
    pub fn route(&self, method: Method, url: impl Into<String>, status: u16, body: &str) -> &Self {
        self.lock()
            .routes
            .insert((method, url.into()), RawResponse::new(status, body));
        self
    }

    /// Answer `GET url` with `200` and `body` as JSON.
    pub fn route_json(&self, url: impl Into<String>, body: &Value) -> &Self {
        self.lock()
            .routes
            .insert((Method::Get, url.into()), RawResponse::json(body));
        self
    }

    /// Times `method url` was executed.
    pub fn calls(&self, method: Method, url: &str) -> usize {
        self.lock()
            .calls
            .get(&(method, url.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Total executions across all routes.
    pub fn total_calls(&self) -> usize {
        self.lock().log.len()
    }

    /// Every request executed so far, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.lock().log.clone()
    }

    /// Hold replies until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Deliver held replies and stop holding.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// URL a request routes to.
    pub fn url_for(request: &TransportRequest) -> String {
        match request.params.get("id") {
            Some(Value::String(id)) => format!("{}{id}", request.endpoint),
            Some(Value::Number(id)) => format!("{}{id}", request.endpoint),
            _ => request.endpoint.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<RawResponse, NetworkError>> + Send + 'static + use<> {
        let route = (request.method, Self::url_for(&request));
        let reply = {
            let mut script = self.lock();
            *script.calls.entry(route.clone()).or_default() += 1;
            script.log.push(request);
            script.routes.get(&route).cloned()
        };
        let mut gate = self.gate.subscribe();
        async move {
            // closed gate never holds
            let _ = gate.wait_for(|open| *open).await;
            reply.ok_or_else(|| NetworkError(format!("no route for {} {}", route.0, route.1)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: Method, endpoint: &str, params: Value) -> TransportRequest {
        TransportRequest {
            method,
            endpoint: endpoint.to_owned(),
            params,
            body: None,
        }
    }

    #[tokio::test]
    async fn routes_by_method_and_id() {
        let transport = ScriptedTransport::new();
        transport
            .route(Method::Get, "http://test.com/article/5", 200, r#"{"id":5}"#)
            .route(Method::Delete, "http://test.com/article/5", 204, "");

        let get = transport
            .execute(request(Method::Get, "http://test.com/article/", json!({"id": 5})))
            .await
            .unwrap();
        let del = transport
            .execute(request(Method::Delete, "http://test.com/article/", json!({"id": 5})))
            .await
            .unwrap();
        assert_eq!(get.status, 200);
        assert_eq!(del.status, 204);
        assert_eq!(transport.calls(Method::Get, "http://test.com/article/5"), 1);
        assert_eq!(transport.total_calls(), 2);
    }

    #[tokio::test]
    async fn unrouted_request_is_a_network_error() {
        let transport = ScriptedTransport::new();
        let err = transport
            .execute(request(Method::Get, "http://test.com/user/", json!({})))
            .await
            .unwrap_err();
        assert!(err.0.contains("http://test.com/user/"));
        assert_eq!(transport.calls(Method::Get, "http://test.com/user/"), 1);
    }

    #[tokio::test]
    async fn held_replies_wait_for_release() {
        let transport = ScriptedTransport::new();
        transport.route_json("http://test.com/user/", &json!([]));
        transport.hold();
        let pending = tokio::spawn(
            transport.execute(request(Method::Get, "http://test.com/user/", json!({}))),
        );
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        transport.release();
        assert_eq!(pending.await.unwrap().unwrap().status, 200);
    }
}
