// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used)]
use normcache_config::{ConfigError, ConfigService, ConfigStore};
use normcache_dry_tests::InMemoryConfigStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Limits {
    ttl_ms: u64,
}

#[test]
fn save_then_load() {
    let service = ConfigService::new(InMemoryConfigStore::new());
    service.save("limits", &Limits { ttl_ms: 500 }).unwrap();
    assert_eq!(
        service.load::<Limits>("limits").unwrap(),
        Some(Limits { ttl_ms: 500 })
    );
}

#[test]
fn missing_and_empty_are_none() {
    let store = InMemoryConfigStore::new();
    store.save_raw("empty", b"").unwrap();
    let service = ConfigService::new(store);
    assert!(service.load::<Limits>("absent").unwrap().is_none());
    assert!(service.load::<Limits>("empty").unwrap().is_none());
}

#[test]
fn malformed_blob_falls_back_to_default() {
    let store = InMemoryConfigStore::new();
    store.save_raw("limits", b"{not json").unwrap();
    let service = ConfigService::new(store);
    assert!(matches!(
        service.load::<Limits>("limits"),
        Err(ConfigError::Serde(_))
    ));
    assert_eq!(service.load_or_default::<Limits>("limits"), Limits::default());
}

#[test]
fn store_failure_falls_back_to_default() {
    let store = InMemoryConfigStore::new();
    store.set_fail_on_load(true);
    let service = ConfigService::new(store);
    assert_eq!(service.load_or_default::<Limits>("limits"), Limits::default());
    assert_eq!(service.store().load_count(), 1);
}
