// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for normcache crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake
//! - [`transport`] - Route-table transport fake with call counting
//! - [`fixtures`] - Article/user/comment schemas, resources and payloads

pub mod config;
pub mod fixtures;
pub mod transport;

pub use config::InMemoryConfigStore;
pub use fixtures::{registry, Article, Comment, User, BASE_URL};
pub use transport::ScriptedTransport;
