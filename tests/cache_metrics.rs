use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode},
    middleware,
};
use metrics_util::debugging::DebuggingRecorder;
use redpage::cache::{
    CacheConfig, CacheConsumer, CacheState, Cascade, EventKind, EventQueue, KeyBuilder, KvStore,
    MemoryStore, response_cache_layer,
};
use redpage::domain::entities::ContentItem;
use redpage::domain::types::{ItemKind, ItemStatus};
use tower::ServiceExt;

fn item(id: i64) -> ContentItem {
    ContentItem {
        id,
        kind: ItemKind::Post,
        slug: format!("metrics-{id}"),
        status: ItemStatus::Published,
        published_at: None,
        categories: Vec::new(),
    }
}

fn consumer(store: Arc<MemoryStore>, queue: Arc<EventQueue>) -> CacheConsumer {
    let config = CacheConfig {
        site_domain: "example.com".to_string(),
        max_attempts: 1,
        ..Default::default()
    };
    let cascade = Arc::new(Cascade::new(
        store,
        KeyBuilder::new("example.com"),
        None,
        Vec::new(),
        config.page_size,
    ));
    CacheConsumer::new(config, queue, cascade, None)
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Successful cascade: queue length, step counts, consume latency
    let queue = Arc::new(EventQueue::new());
    let healthy = consumer(Arc::new(MemoryStore::new()), queue.clone());
    queue.publish(EventKind::PublicationChanged {
        item: item(1),
        old_status: ItemStatus::Draft,
        new_status: ItemStatus::Published,
    });
    assert!(healthy.consume().await);

    // Corrupt rank fails the cascade; a single allowed attempt drops the event
    let corrupt = Arc::new(MemoryStore::new());
    corrupt
        .hset("example.com:post-position", "2", Bytes::from_static(b"second"))
        .await
        .expect("seed");
    let failing_queue = Arc::new(EventQueue::new());
    let failing = consumer(corrupt, failing_queue.clone());
    failing_queue.publish(EventKind::PublicationChanged {
        item: item(2),
        old_status: ItemStatus::Published,
        new_status: ItemStatus::Published,
    });
    assert!(failing.consume().await);
    assert!(failing_queue.is_empty());

    // Request path: miss, hit, bypass, then a store error
    let store = Arc::new(MemoryStore::new());
    let cache_state = CacheState::new(CacheConfig::default(), store, None);
    let app = Router::new()
        .fallback(|| async { ([("content-type", "text/html")], "<p>page</p>") })
        .layer(middleware::from_fn_with_state(
            cache_state,
            response_cache_layer,
        ));

    for uri in ["/one/", "/one/", "/feed/"] {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("host", "example.com")
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let store_error = Arc::new(MemoryStore::new());
    store_error
        .sadd("example.com:single", "/wrong-type/")
        .await
        .expect("seed");
    let app = Router::new()
        .fallback(|| async { ([("content-type", "text/html")], "<p>page</p>") })
        .layer(middleware::from_fn_with_state(
            CacheState::new(CacheConfig::default(), store_error, None),
            response_cache_layer,
        ));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/two/")
                .header("host", "example.com")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "redpage_cache_action_total",
        "redpage_cache_store_error_total",
        "redpage_cache_request_ms",
        "redpage_cache_event_queue_len",
        "redpage_cache_consume_ms",
        "redpage_cache_cascade_step_total",
        "redpage_cache_event_dropped_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
