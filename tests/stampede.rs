mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use tag_cache::prelude::*;
use tag_cache::tags;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_miss_is_computed_once() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(
        ScriptedSource::new(catalog())
            .answer(USERS_QUERY, json!([{"id": 1}]))
            .with_latency(Duration::from_millis(50)),
    );
    let cache = Arc::new(build_cache(&backend, &source, config(100, 2_000)));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(
            async move { cache.get_value(USERS_QUERY, &json!({})).await },
        ));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), json!([{"id": 1}]));
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stale_value_is_recomputed_once() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(
        ScriptedSource::new(catalog())
            .answer(USERS_QUERY, json!([{"id": 1}]))
            .with_latency(Duration::from_millis(50)),
    );
    let cache = Arc::new(build_cache(&backend, &source, config(100, 2_000)));

    cache.get_value(USERS_QUERY, &json!({})).await.unwrap();
    tick().await;
    cache.init_tags(&tags!["users"]).await.unwrap();
    source.set_answer(USERS_QUERY, json!([{"id": 2}]));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(
            async move { cache.get_value(USERS_QUERY, &json!({})).await },
        ));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), json!([{"id": 2}]));
    }
    assert_eq!(source.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn caches_sharing_a_backend_coordinate() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(
        ScriptedSource::new(catalog())
            .answer(USERS_QUERY, json!([{"id": 1}]))
            .with_latency(Duration::from_millis(50)),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        // A separate cache object per task, like separate processes would have.
        let cache = build_cache(&backend, &source, config(100, 2_000));
        tasks.push(tokio::spawn(
            async move { cache.get_value(USERS_QUERY, &json!({})).await },
        ));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), json!([{"id": 1}]));
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn waiters_give_up_after_try_count() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(ScriptedSource::new(catalog()).answer(USERS_QUERY, json!([])));
    let cache = build_cache(&backend, &source, config(3, 1_000));

    let key = cache.derive_key(USERS_QUERY, &json!({})).unwrap();
    backend
        .set_if_absent(
            key.as_str(),
            tag_cache::config::DEFAULT_LOCK_VALUE.as_bytes(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let err = cache.get_value(USERS_QUERY, &json!({})).await.unwrap_err();
    let CacheError::LockTimeout { key: timed_out, attempts } = &err
    else {
        panic!("expected a lock timeout, got {err:?}");
    };
    assert_eq!(*timed_out, key);
    assert_eq!(*attempts, 3);
    assert_eq!(backend.gets(key.as_str()), 3);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn expired_lock_is_taken_over() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(ScriptedSource::new(catalog()).answer(USERS_QUERY, json!([{"id": 1}])));
    let cache = build_cache(&backend, &source, config(50, 2_000));

    // A crashed owner leaves a short-lived sentinel behind.
    let key = cache.derive_key(USERS_QUERY, &json!({})).unwrap();
    backend
        .set(
            key.as_str(),
            tag_cache::config::DEFAULT_LOCK_VALUE.as_bytes(),
            Duration::from_millis(20),
        )
        .await
        .unwrap();

    assert_eq!(cache.get_value(USERS_QUERY, &json!({})).await.unwrap(), json!([{"id": 1}]));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn custom_sentinel() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(ScriptedSource::new(catalog()).answer(USERS_QUERY, json!([{"id": 1}])));
    let mut config = config(2, 100);
    config.set_lock_value("busy".to_string());
    let cache = build_cache(&backend, &source, config);

    let key = cache.derive_key(USERS_QUERY, &json!({})).unwrap();

    // The default sentinel means nothing to this cache: it's just garbage to be replaced.
    backend
        .set(
            key.as_str(),
            tag_cache::config::DEFAULT_LOCK_VALUE.as_bytes(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(cache.get_value(USERS_QUERY, &json!({})).await.unwrap(), json!([{"id": 1}]));

    backend.set(key.as_str(), b"busy", Duration::from_secs(10)).await.unwrap();
    let err = cache.get_value(USERS_QUERY, &json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockTimeout);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn failed_recompute_keeps_lock_taken_over_by_another() {
    let backend = Arc::new(CountingBackend::default());
    let source = Arc::new(
        ScriptedSource::new(QueryCatalog::new().reads("SELECT slow", ["t"])).with_latency(Duration::from_millis(1_300)),
    );
    let mut config = config(5, 1_000);
    config.set_lock_ttl(1);
    let cache = Arc::new(build_cache(&backend, &source, config));
    let key = cache.derive_key("SELECT slow", &json!({})).unwrap();

    let failing = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_value("SELECT slow", &json!({})).await })
    };

    // Our lock expires while the query is still running, and someone else locks the key.
    tokio::time::sleep(Duration::from_millis(1_150)).await;
    assert!(backend
        .set_if_absent(
            key.as_str(),
            tag_cache::config::DEFAULT_LOCK_VALUE.as_bytes(),
            Duration::from_secs(10),
        )
        .await
        .unwrap());

    let err = failing.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert_eq!(
        backend.get(key.as_str()).await.unwrap().as_deref(),
        Some(tag_cache::config::DEFAULT_LOCK_VALUE.as_bytes()),
        "the other holder's lock must stay"
    );
}
