// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fetch error taxonomy.

use normcache_core::{DenormalizeError, NormalizeError};
use thiserror::Error;

use crate::transport::NetworkError;

/// Message carried by [`FetchError::PayloadShape`] when a structured response
/// was expected and the body was empty or not JSON.
pub const JSON_EXPECTED: &str = "JSON expected but not returned from API";

/// Why a fetch failed. Nothing is committed to the cache on any of these.
///
/// `Clone` because one settled outcome is handed to every caller that was
/// waiting on the same request key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server answered with a status >= 400.
    #[error("request failed with status {status}")]
    Transport {
        /// HTTP status code.
        status: u16,
        /// Raw response body (possibly empty).
        body: String,
    },
    /// The request never produced a response.
    #[error("network failure: {0}")]
    Network(String),
    /// The response arrived but is not usable JSON for the expected shape.
    #[error("{0}")]
    PayloadShape(String),
    /// The JSON was structurally plausible but an entity key could not be extracted.
    #[error("normalization failed: {0}")]
    Normalization(NormalizeError),
    /// The task executing the request went away before settling.
    #[error("fetch abandoned before it settled")]
    Abandoned,
}

impl FetchError {
    /// HTTP status, for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<NetworkError> for FetchError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err.0)
    }
}

impl From<NormalizeError> for FetchError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::NoParseablePayload { .. } => Self::PayloadShape(err.to_string()),
            other => Self::Normalization(other),
        }
    }
}

/// Failure of a fetch-then-denormalize read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The fetch itself failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The fetch succeeded but the value could not be rebuilt.
    #[error(transparent)]
    Denormalize(#[from] DenormalizeError),
}

impl ReadError {
    /// HTTP status of the failure: the transport status, or 404 for an entity
    /// deleted through the engine.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch(err) => err.status(),
            Self::Denormalize(DenormalizeError::Gone(_)) => Some(404),
            Self::Denormalize(_) => None,
        }
    }
}
