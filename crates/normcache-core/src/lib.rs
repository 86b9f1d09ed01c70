// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! normcache-core: schema-driven normalization and the normalized entity store.
//!
//! Payloads go in through [`normalize`], which splits them into a flat
//! [`EntityBatch`] and a [`ResultDescriptor`]. A [`NormalizedCache`] merges
//! batches field by field and records descriptors per [`RequestKey`].
//! [`denormalize`] turns a descriptor back into a value, resolving every
//! reference against the current entity records.
//!
//! Nothing here performs I/O or spawns tasks; the fetch layer lives in
//! `normcache-fetch`.
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
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::use_self
)]

pub mod batch;
mod cache;
mod denormalize;
mod ident;
mod normalize;
mod schema;

/// Entity batches and the merge rule.
pub use batch::{merge_fields, EntityBatch};
/// Normalized store, records, and the shared handle.
pub use cache::{EntityMeta, EntityRecord, NormalizedCache, ResultRecord, SharedCache};
/// Reconstruction of values from descriptors.
pub use denormalize::{
    denormalize, denormalize_as, denormalize_resource, DenormalizeError, EntitySource, Lookup,
};
/// Identifier newtypes.
pub use ident::{EntityId, EntityRef, EntityType, RequestKey, Revision};
/// Normalization of payloads.
pub use normalize::{normalize, normalize_resource, NormalizeError, Normalized, ResultDescriptor};
/// Schema declaration and lookup.
pub use schema::{KeyFn, Resource, Schema, SchemaBuilder, SchemaError, SchemaRegistry, Shape};
