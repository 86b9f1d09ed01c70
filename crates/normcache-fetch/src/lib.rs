// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! normcache-fetch: deduplicated fetching into a normalized cache.
//!
//! A [`FetchManager`] keys every request, lets concurrent callers with the
//! same key share one network execution, validates the response, normalizes
//! it, and commits the result to a [`SharedCache`](normcache_core::SharedCache).
//! [`FetchClient`] layers [`Endpoint`] descriptors and a [`Transport`] on top.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::future_not_send
)]

mod client;
mod config;
mod error;
mod inflight;
mod manager;
mod request;
mod transport;

pub use client::FetchClient;
pub use config::{FetchConfig, CONFIG_KEY};
pub use error::{FetchError, ReadError, JSON_EXPECTED};
pub use inflight::{Begin, FetchOutcome, InFlightTable, KeyState, Waiter};
pub use manager::{FetchHandle, FetchManager};
pub use request::{request_key, Endpoint, Method};
pub use transport::{decode_response, NetworkError, RawResponse, Transport, TransportRequest};
