// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used)]

use std::time::Duration;

use normcache_config::ConfigService;
use normcache_dry_tests::InMemoryConfigStore;
use normcache_fetch::{FetchConfig, CONFIG_KEY};
use serde_json::json;

#[test]
fn stored_settings_are_loaded() {
    let store = InMemoryConfigStore::with_json([(CONFIG_KEY, json!({"result_ttl_ms": 250}))]);
    let config = FetchConfig::load_or_default(&ConfigService::new(store));
    assert_eq!(config.result_ttl(), Duration::from_millis(250));
}

#[test]
fn absent_or_partial_settings_use_defaults() {
    let empty = ConfigService::new(InMemoryConfigStore::new());
    assert_eq!(FetchConfig::load_or_default(&empty), FetchConfig::default());

    let partial = ConfigService::new(InMemoryConfigStore::with_json([(CONFIG_KEY, json!({}))]));
    assert_eq!(FetchConfig::load_or_default(&partial).result_ttl_ms, 0);
}

#[test]
fn unreadable_store_falls_back_to_defaults() {
    let store = InMemoryConfigStore::new();
    store.set_fail_on_load(true);
    let service = ConfigService::new(store.clone());
    assert_eq!(FetchConfig::load_or_default(&service), FetchConfig::default());
    assert_eq!(store.load_count(), 1);
}

#[test]
fn save_round_trips() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    FetchConfig { result_ttl_ms: 5_000 }.save(&service).unwrap();
    assert!(store.contains_key(CONFIG_KEY));
    assert_eq!(FetchConfig::load_or_default(&service).result_ttl_ms, 5_000);
}
