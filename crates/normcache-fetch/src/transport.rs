// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport port and response validation.
//!
//! The engine never speaks HTTP itself. A [`Transport`] (or a one-off executor
//! closure handed to [`FetchManager::fetch`](crate::FetchManager::fetch))
//! returns a [`RawResponse`]; [`decode_response`] decides whether that
//! response is a failure, an acceptable empty body, or JSON to normalize.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{FetchError, JSON_EXPECTED};
use crate::request::Method;

/// Everything a transport needs to perform one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Endpoint identity (typically a base URL); URL construction is the
    /// transport's job.
    pub endpoint: String,
    /// Request parameters.
    pub params: Value,
    /// Request body, for mutations.
    pub body: Option<Value>,
}

/// Status and raw body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Undecoded body text.
    pub body: String,
}

impl RawResponse {
    /// Response with the given status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `200 OK` with `value` serialized as the body.
    pub fn json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }
}

/// The request failed before any response (DNS, connection reset, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NetworkError(pub String);

/// Application-supplied HTTP transport.
///
/// The returned future must own everything it needs: the engine runs it on a
/// spawned task so that settlement happens even if every caller stops waiting.
/// It captures no borrow of `self`.
pub trait Transport: Send + Sync + 'static {
    /// Perform one request.
    fn execute(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<RawResponse, NetworkError>> + Send + 'static + use<Self>;
}

/// Validate a response and parse its body.
///
/// - status >= 400 → [`FetchError::Transport`] carrying status and body;
/// - empty or non-JSON body → [`FetchError::PayloadShape`] when
///   `expects_json`, otherwise `Ok(None)` (e.g. a `204` for a delete);
/// - otherwise the parsed JSON.
///
/// # Errors
///
/// As listed above.
pub fn decode_response(
    response: RawResponse,
    expects_json: bool,
) -> Result<Option<Value>, FetchError> {
    if response.status >= 400 {
        return Err(FetchError::Transport {
            status: response.status,
            body: response.body,
        });
    }
    if response.body.trim().is_empty() {
        return if expects_json {
            Err(FetchError::PayloadShape(JSON_EXPECTED.to_owned()))
        } else {
            Ok(None)
        };
    }
    match serde_json::from_str(&response.body) {
        Ok(value) => Ok(Some(value)),
        Err(_) if expects_json => Err(FetchError::PayloadShape(JSON_EXPECTED.to_owned())),
        Err(_) => Ok(None),
    }
}
