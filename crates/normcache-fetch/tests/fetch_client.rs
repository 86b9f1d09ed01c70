// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end fetch scenarios against a scripted transport.

#![allow(missing_docs, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use normcache_core::{DenormalizeError, EntityId, EntityRef, EntityType, SharedCache};
use normcache_dry_tests::fixtures::{
    article_delete, article_detail, article_list, article_payload, article_update,
    nested_articles_payload, user_list, users_payload,
};
use normcache_dry_tests::{registry, Article, ScriptedTransport, User, BASE_URL};
use normcache_fetch::{
    Endpoint, FetchClient, FetchConfig, FetchError, FetchManager, Method, ReadError,
    JSON_EXPECTED,
};
use serde_json::{json, Value};

fn client_with(config: FetchConfig) -> (FetchClient<ScriptedTransport>, ScriptedTransport) {
    let transport = ScriptedTransport::new();
    let manager =
        FetchManager::with_config(SharedCache::new(), Arc::new(registry().unwrap()), config);
    (FetchClient::new(manager, transport.clone()), transport)
}

fn client() -> (FetchClient<ScriptedTransport>, ScriptedTransport) {
    client_with(FetchConfig::default())
}

fn url(path: &str) -> String {
    format!("{BASE_URL}{path}")
}

fn id(n: u64) -> Option<Value> {
    Some(json!({ "id": n }))
}

#[tokio::test]
async fn resolves_detail_into_typed_resource() {
    let (client, transport) = client();
    transport.route_json(url("/article-cooler/5"), &article_payload());

    let article: Article = client.read(&article_detail(), id(5)).await.unwrap().unwrap();
    assert_eq!(article.title, "hi ho");
    assert_eq!(article.tags, ["a", "best", "react"]);
    assert_eq!(article.author, None);
}

#[tokio::test]
async fn concurrent_callers_share_one_request() {
    let (client, transport) = client();
    transport.route_json(url("/article-cooler/5"), &article_payload());

    let detail = article_detail();
    let (a, b, c) = tokio::join!(
        client.fetch(&detail, id(5)),
        client.fetch(&detail, id(5)),
        client.fetch(&detail, id(5)),
    );
    let key = detail.request_key(id(5).as_ref());
    assert_eq!(a.unwrap(), key);
    assert_eq!(b.unwrap(), key);
    assert_eq!(c.unwrap(), key);
    assert_eq!(transport.calls(Method::Get, &url("/article-cooler/5")), 1);
}

#[tokio::test]
async fn followers_share_the_failure_too() {
    let (client, transport) = client();
    transport.route(Method::Get, url("/article-cooler/0"), 403, "");
    transport.hold();

    let handles: Vec<_> = (0..4)
        .map(|_| client.start(&article_detail(), id(0)))
        .collect();
    assert!(client.is_pending(&article_detail(), id(0).as_ref()));
    transport.release();

    for handle in handles {
        assert_eq!(handle.wait().await.unwrap_err().status(), Some(403));
    }
    assert!(!client.is_pending(&article_detail(), id(0).as_ref()));
    assert_eq!(transport.total_calls(), 1);
}

#[tokio::test]
async fn forbidden_surfaces_status_and_commits_nothing() {
    let (client, transport) = client();
    transport.route(Method::Get, url("/article-cooler/0"), 403, "");

    let err = client
        .read::<Article>(&article_detail(), id(0))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(matches!(
        err,
        ReadError::Fetch(FetchError::Transport { status: 403, .. })
    ));
    let cache = client.manager().cache().read();
    assert_eq!(cache.entity_count(), 0);
    assert_eq!(cache.result_count(), 0);
}

#[tokio::test]
async fn empty_body_is_rejected_as_payload_shape() {
    let (client, transport) = client();
    transport.route(Method::Get, url("/article-cooler/666"), 200, "");

    let err = client.fetch(&article_detail(), id(666)).await.unwrap_err();
    assert_eq!(err, FetchError::PayloadShape(JSON_EXPECTED.to_owned()));
    assert!(err.to_string().contains("JSON expected but not returned"));
    assert_eq!(client.manager().cache().read().revision().0, 0);
}

#[tokio::test]
async fn scalar_body_for_entity_shape_is_payload_shape() {
    let (client, transport) = client();
    transport.route(Method::Get, url("/article-cooler/7"), 200, r#""just text""#);

    let err = client.fetch(&article_detail(), id(7)).await.unwrap_err();
    assert!(matches!(err, FetchError::PayloadShape(_)));
}

#[tokio::test]
async fn entity_without_key_is_a_normalization_error() {
    let (client, transport) = client();
    transport.route_json(url("/article-cooler/8"), &json!({"title": "no id"}));

    let err = client.fetch(&article_detail(), id(8)).await.unwrap_err();
    assert!(matches!(err, FetchError::Normalization(_)));
    assert_eq!(client.manager().cache().read().entity_count(), 0);
}

#[tokio::test]
async fn nested_partials_merge_into_one_user() {
    let (client, transport) = client();
    transport.route_json(url("/article-cooler/"), &nested_articles_payload());

    let articles: Vec<Article> = client
        .read(&article_list(), Some(json!({})))
        .await
        .unwrap()
        .unwrap();
    let expected = User {
        id: 23,
        username: "charles".into(),
        email: Some("bob@bob.com".into()),
        is_admin: None,
    };
    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].author.as_ref(), Some(&expected));
    assert_eq!(articles[1].author.as_ref(), Some(&expected));

    let cache = client.manager().cache().read();
    assert_eq!(cache.entities_of(&EntityType::new("user")).count(), 1);
    assert_eq!(cache.entity_count(), 3);
    let stored = cache.entity(&EntityRef::new("article", "3")).unwrap();
    assert_eq!(stored.field("author"), Some(&json!("23")));
}

#[tokio::test]
async fn missing_params_do_nothing() {
    let (client, transport) = client();

    assert_eq!(client.fetch(&article_detail(), None).await.unwrap(), None);
    assert_eq!(
        client.fetch(&article_detail(), Some(Value::Null)).await.unwrap(),
        None
    );
    assert!(client
        .read::<Article>(&article_detail(), None)
        .await
        .unwrap()
        .is_none());
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn rejected_key_is_retried_on_next_fetch() {
    let (client, transport) = client();
    transport.route(Method::Get, url("/article-cooler/5"), 500, "boom");
    assert!(client.fetch(&article_detail(), id(5)).await.is_err());

    transport.route_json(url("/article-cooler/5"), &article_payload());
    assert!(client.fetch(&article_detail(), id(5)).await.unwrap().is_some());
    assert_eq!(transport.calls(Method::Get, &url("/article-cooler/5")), 2);
}

#[tokio::test]
async fn unrouted_request_is_a_network_error() {
    let (client, _transport) = client();
    let err = client.fetch(&article_detail(), id(99)).await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
}

#[tokio::test]
async fn deleted_entity_reads_as_gone() {
    let (client, transport) = client();
    transport
        .route_json(url("/article-cooler/5"), &article_payload())
        .route(Method::Delete, url("/article-cooler/5"), 204, "");
    let key = client.fetch(&article_detail(), id(5)).await.unwrap().unwrap();

    let target = EntityRef::new("article", EntityId::from(5_u64));
    client
        .delete(&article_delete(), id(5), &target)
        .await
        .unwrap();

    let cache = client.manager().cache().read();
    let err = cache
        .denormalize_result::<Article>(client.manager().registry(), &key)
        .unwrap_err();
    assert_eq!(err, DenormalizeError::Gone(target));
    assert_eq!(ReadError::from(err).status(), Some(404));
}

#[tokio::test]
async fn delete_accepts_empty_and_json_bodies() {
    let (client, transport) = client();
    transport
        .route(Method::Delete, url("/article-cooler/5"), 204, "")
        .route(Method::Delete, url("/article/5"), 200, "{}");
    let plain = Endpoint::delete(url("/article/"));
    let target = EntityRef::new("article", "5");

    for endpoint in [article_delete(), plain] {
        client.delete(&endpoint, id(5), &target).await.unwrap();
    }
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test]
async fn failed_delete_leaves_cache_alone() {
    let (client, transport) = client();
    transport
        .route_json(url("/article-cooler/5"), &article_payload())
        .route(Method::Delete, url("/article-cooler/5"), 403, "");
    client.fetch(&article_detail(), id(5)).await.unwrap();

    let target = EntityRef::new("article", "5");
    let err = client
        .delete(&article_delete(), id(5), &target)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
    let cache = client.manager().cache().read();
    assert!(cache.entity(&target).is_some());
    assert!(!cache.is_gone(&target));
}

#[tokio::test]
async fn parallel_fetches_resolve_independently() {
    let (client, transport) = client();
    transport
        .route_json(url("/article-cooler/5"), &article_payload())
        .route_json(url("/user/"), &users_payload());
    transport.hold();

    let detail = article_detail();
    let users = user_list();
    let outcomes = tokio::join!(
        client.fetch_all(vec![(&detail, id(5)), (&users, Some(json!({})))]),
        async {
            tokio::task::yield_now().await;
            assert_eq!(transport.total_calls(), 2);
            transport.release();
        },
    )
    .0;
    assert!(outcomes.iter().all(Result::is_ok));

    let cache = client.manager().cache().read();
    let registry = client.manager().registry();
    let article: Article = cache
        .denormalize_result(registry, outcomes[0].as_ref().unwrap().as_ref().unwrap())
        .unwrap();
    let users: Vec<User> = cache
        .denormalize_result(registry, outcomes[1].as_ref().unwrap().as_ref().unwrap())
        .unwrap();
    assert_eq!(article.title, "hi ho");
    assert_eq!(users.len(), 2);
    assert_eq!(users[1].is_admin, Some(true));
}

#[tokio::test]
async fn mutation_merges_into_cached_entity() {
    let (client, transport) = client();
    transport
        .route_json(url("/article-cooler/5"), &article_payload())
        .route(
            Method::Put,
            url("/article-cooler/5"),
            200,
            r#"{"id":5,"title":"updated"}"#,
        );
    let key = client.fetch(&article_detail(), id(5)).await.unwrap().unwrap();

    let updated: Article = client
        .mutate(&article_update(), id(5), json!({"title": "updated"}))
        .await
        .unwrap();
    assert_eq!(updated.title, "updated");
    assert_eq!(updated.content, "whatever");

    let cache = client.manager().cache().read();
    assert_eq!(cache.result_count(), 1);
    let reread: Article = cache
        .denormalize_result(client.manager().registry(), &key)
        .unwrap();
    assert_eq!(reread, updated);
    let sent = transport.requests();
    assert_eq!(sent[1].body, Some(json!({"title": "updated"})));
}

#[tokio::test]
async fn mutations_are_never_deduplicated() {
    let (client, transport) = client();
    transport.route(Method::Put, url("/article-cooler/5"), 200, r#"{"id":5,"title":"x"}"#);

    let update = article_update();
    let body = json!({"title": "x"});
    let (a, b) = tokio::join!(
        client.mutate::<Value>(&update, id(5), body.clone()),
        client.mutate::<Value>(&update, id(5), body),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(Method::Put, &url("/article-cooler/5")), 2);
}

#[tokio::test]
async fn abandoned_caller_does_not_cancel_the_request() {
    let (client, transport) = client();
    transport.route_json(url("/article-cooler/5"), &article_payload());
    transport.hold();

    drop(client.start(&article_detail(), id(5)));
    transport.release();
    for _ in 0..100 {
        if !client.is_pending(&article_detail(), id(5).as_ref()) {
            break;
        }
        tokio::task::yield_now().await;
    }

    let cache = client.manager().cache().read();
    assert!(cache.entity(&EntityRef::new("article", "5")).is_some());
}

#[tokio::test(start_paused = true)]
async fn fresh_results_skip_the_network() {
    let (client, transport) = client_with(FetchConfig {
        result_ttl_ms: 1_000,
    });
    transport.route_json(url("/article-cooler/5"), &article_payload());
    let route = url("/article-cooler/5");

    client.fetch(&article_detail(), id(5)).await.unwrap();
    client.fetch(&article_detail(), id(5)).await.unwrap();
    assert_eq!(transport.calls(Method::Get, &route), 1);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    client.fetch(&article_detail(), id(5)).await.unwrap();
    assert_eq!(transport.calls(Method::Get, &route), 2);
}

#[tokio::test]
async fn zero_ttl_always_refetches() {
    let (client, transport) = client();
    transport.route_json(url("/article-cooler/5"), &article_payload());

    client.fetch(&article_detail(), id(5)).await.unwrap();
    client.fetch(&article_detail(), id(5)).await.unwrap();
    assert_eq!(transport.calls(Method::Get, &url("/article-cooler/5")), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidated_entity_forces_refetch_within_window() {
    let (client, transport) = client_with(FetchConfig {
        result_ttl_ms: 60_000,
    });
    transport.route_json(url("/article-cooler/5"), &article_payload());
    let detail = article_detail();

    client.fetch(&detail, id(5)).await.unwrap();
    client
        .manager()
        .cache()
        .write()
        .invalidate(&EntityRef::new("article", "5"));

    let article: Article = client.read(&detail, id(5)).await.unwrap().unwrap();
    assert_eq!(article.title, "hi ho");
    assert_eq!(transport.calls(Method::Get, &url("/article-cooler/5")), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidated_nested_entity_forces_refetch_within_window() {
    let (client, transport) = client_with(FetchConfig {
        result_ttl_ms: 60_000,
    });
    transport.route_json(url("/article-cooler/"), &nested_articles_payload());
    let list = article_list();

    client.fetch(&list, Some(json!({}))).await.unwrap();
    client.fetch(&list, Some(json!({}))).await.unwrap();
    assert_eq!(transport.calls(Method::Get, &url("/article-cooler/")), 1);

    client
        .manager()
        .cache()
        .write()
        .invalidate(&EntityRef::new("user", "23"));
    let articles: Vec<Article> = client.read(&list, Some(json!({}))).await.unwrap().unwrap();
    assert_eq!(articles[0].author.as_ref().unwrap().username, "charles");
    assert_eq!(transport.calls(Method::Get, &url("/article-cooler/")), 2);
}
