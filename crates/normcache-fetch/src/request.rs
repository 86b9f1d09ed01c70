// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Endpoint descriptors and request-key derivation.

use std::fmt;

use normcache_core::{RequestKey, Shape};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::TransportRequest;

/// HTTP method of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Delete.
    Delete,
}

impl Method {
    /// Upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API operation: method, endpoint identity, and response shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    method: Method,
    url: String,
    shape: Shape,
}

impl Endpoint {
    /// Endpoint with an explicit method.
    pub fn new(method: Method, url: impl Into<String>, shape: Shape) -> Self {
        Self {
            method,
            url: url.into(),
            shape,
        }
    }

    /// `GET` endpoint.
    pub fn get(url: impl Into<String>, shape: Shape) -> Self {
        Self::new(Method::Get, url, shape)
    }

    /// `POST` endpoint.
    pub fn post(url: impl Into<String>, shape: Shape) -> Self {
        Self::new(Method::Post, url, shape)
    }

    /// `PUT` endpoint.
    pub fn put(url: impl Into<String>, shape: Shape) -> Self {
        Self::new(Method::Put, url, shape)
    }

    /// `PATCH` endpoint.
    pub fn patch(url: impl Into<String>, shape: Shape) -> Self {
        Self::new(Method::Patch, url, shape)
    }

    /// `DELETE` endpoint; its response body is ignored.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url, Shape::Scalar)
    }

    /// HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Endpoint identity.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Expected response shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Request key for `params`, or `None` when there is nothing to fetch
    /// (`params` absent or JSON `null`).
    pub fn request_key(&self, params: Option<&Value>) -> Option<RequestKey> {
        match params {
            None | Some(Value::Null) => None,
            Some(params) => Some(request_key(self.method, &self.url, params)),
        }
    }

    /// Build the transport request for `params` and `body`.
    pub fn transport_request(&self, params: Value, body: Option<Value>) -> TransportRequest {
        TransportRequest {
            method: self.method,
            endpoint: self.url.clone(),
            params,
            body,
        }
    }
}

/// Derive the key `"{METHOD} {url} {params}"` with params in canonical JSON
/// (object keys sorted, no whitespace).
pub fn request_key(method: Method, url: &str, params: &Value) -> RequestKey {
    let mut key = format!("{method} {url} ");
    write_canonical(&mut key, params);
    RequestKey::new(key)
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                if let Some(item) = fields.get(key) {
                    write_canonical(out, item);
                }
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
