use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderValue, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use redpage::cache::{
    CacheConfig, CacheState, KeyBuilder, KvStore, MemoryStore, Namespace, PagePath, StoreError,
    StoreInfo, X_CACHE,
};
use redpage::infra::http::build_public_router;
use redpage::infra::redis::RedisStore;
use tower::ServiceExt;

const OPERATOR: &str = "wordpress_logged_in_0f1e=admin";

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    renders: Arc<AtomicUsize>,
}

fn origin(renders: Arc<AtomicUsize>) -> Router {
    Router::new().fallback(move |request: Request<Body>| {
        let renders = Arc::clone(&renders);
        async move {
            renders.fetch_add(1, Ordering::SeqCst);
            let path = request.uri().path().to_string();
            let html = [(header::CONTENT_TYPE, "text/html; charset=utf-8")];
            match path.as_str() {
                "/login/" => (
                    StatusCode::OK,
                    [(header::SET_COOKIE, "sid=1; HttpOnly")],
                    "<p>login</p>",
                )
                    .into_response(),
                "/missing/" => (StatusCode::NOT_FOUND, html, "<p>missing</p>").into_response(),
                "/data/" => (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    "{}",
                )
                    .into_response(),
                _ => (StatusCode::OK, html, format!("<p>{path}</p>")).into_response(),
            }
        }
    })
}

fn harness(config: CacheConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let renders = Arc::new(AtomicUsize::new(0));
    let state = CacheState::new(config, store.clone(), None);
    Harness {
        app: build_public_router(origin(renders.clone()), Some(state)),
        store,
        renders,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Bytes) {
    let response: Response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let x_cache = response
        .headers()
        .get(X_CACHE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect");
    (status, x_cache, body)
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::HOST, "example.com");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request should build")
}

fn keys() -> KeyBuilder {
    KeyBuilder::new("example.com")
}

async fn cached(store: &MemoryStore, namespace: Namespace, path: &str) -> Option<Bytes> {
    store
        .hget(keys().build(&namespace).as_str(), path)
        .await
        .expect("hget")
}

#[tokio::test]
async fn stored_page_is_served_byte_for_byte() {
    let h = harness(CacheConfig::default());

    let (status, x_cache, first) = send(&h.app, get("/hello/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache.as_deref(), Some("MISS"));

    let (status, x_cache, second) = send(&h.app, get("/hello/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache.as_deref(), Some("HIT"));
    assert_eq!(first, second);
    assert_eq!(h.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn query_noise_case_and_www_share_one_entry() {
    let h = harness(CacheConfig::default());
    send(&h.app, get("/Hello/?utm_source=feed", None)).await;

    let request = Request::builder()
        .uri("/hello/?utm_medium=social")
        .header(header::HOST, "WWW.example.com:443")
        .body(Body::empty())
        .expect("request");
    let (_, x_cache, _) = send(&h.app, request).await;

    assert_eq!(x_cache.as_deref(), Some("HIT"));
    assert!(cached(&h.store, Namespace::Single, "/hello/").await.is_some());
}

#[tokio::test]
async fn listing_pages_go_to_the_index_namespace() {
    let h = harness(CacheConfig::default());
    send(&h.app, get("/", None)).await;
    send(&h.app, get("/page/2/", None)).await;

    assert!(cached(&h.store, Namespace::Index, "/").await.is_some());
    assert!(cached(&h.store, Namespace::Index, "/page/2/").await.is_some());
    assert!(cached(&h.store, Namespace::Single, "/").await.is_none());
}

#[tokio::test]
async fn bypass_conditions_never_read_or_write() {
    let h = harness(CacheConfig::default());
    h.store
        .hset(
            keys().build(&Namespace::Single).as_str(),
            "/a/",
            Bytes::from_static(b"stale"),
        )
        .await
        .expect("seed");

    let (_, x_cache, body) = send(&h.app, get("/a/", Some(OPERATOR))).await;
    assert_eq!(x_cache.as_deref(), Some("BYPASS"));
    assert_eq!(&body[..], b"<p>/a/</p>");

    for uri in ["/feed/", "/?s=term", "/b/?replytocom=12"] {
        let (_, x_cache, _) = send(&h.app, get(uri, None)).await;
        assert_eq!(x_cache.as_deref(), Some("BYPASS"), "{uri}");
    }

    let post = Request::builder()
        .method(Method::POST)
        .uri("/a/")
        .header(header::HOST, "example.com")
        .body(Body::from("comment=hi"))
        .expect("request");
    let (_, x_cache, _) = send(&h.app, post).await;
    assert_eq!(x_cache.as_deref(), Some("BYPASS"));

    assert!(cached(&h.store, Namespace::Feed, "/feed/").await.is_none());
    assert!(cached(&h.store, Namespace::Index, "/").await.is_none());
    assert!(cached(&h.store, Namespace::Single, "/b/").await.is_none());
    assert_eq!(h.renders.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn request_without_host_bypasses() {
    let h = harness(CacheConfig::default());
    let request = Request::builder()
        .uri("/a/")
        .body(Body::empty())
        .expect("request");

    let (status, x_cache, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache.as_deref(), Some("BYPASS"));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn uncacheable_responses_are_not_stored() {
    let h = harness(CacheConfig::default());
    for uri in ["/login/", "/missing/", "/data/"] {
        let (_, x_cache, _) = send(&h.app, get(uri, None)).await;
        assert_eq!(x_cache.as_deref(), Some("MISS"), "{uri}");
    }
    assert!(h.store.is_empty());

    let h = harness(CacheConfig {
        max_body_bytes: 4,
        ..Default::default()
    });
    let (_, _, body) = send(&h.app, get("/long/", None)).await;
    assert_eq!(&body[..], b"<p>/long/</p>");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn operator_page_delete_removes_comment_variants() {
    let h = harness(CacheConfig::default());
    for uri in ["/a/", "/a/comment-page-2/", "/a/comment-page-3/"] {
        send(&h.app, get(uri, None)).await;
    }
    let set_key = keys().comment_set(&PagePath::from_canonical("/a/"));
    let mut members = h.store.smembers(set_key.as_str()).await.expect("members");
    members.sort();
    assert_eq!(members, vec!["/a/comment-page-2/", "/a/comment-page-3/"]);

    let (status, x_cache, body) =
        send(&h.app, get("/a/?delete-page-cache", Some(OPERATOR))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache.as_deref(), Some("PURGE"));
    assert_eq!(&body[..], b"<p>/a/</p>");

    for path in ["/a/", "/a/comment-page-2/", "/a/comment-page-3/"] {
        assert!(cached(&h.store, Namespace::Single, path).await.is_none(), "{path}");
    }
    assert!(!h.store.exists(set_key.as_str()).await.expect("exists"));
}

#[tokio::test]
async fn visitor_directives_are_ignored_and_stripped() {
    let h = harness(CacheConfig::default());
    send(&h.app, get("/a/", None)).await;

    let (_, x_cache, _) = send(&h.app, get("/a/?delete-page-cache", None)).await;
    assert_eq!(x_cache.as_deref(), Some("HIT"));
    let (_, x_cache, _) = send(&h.app, get("/a/?delete-domain-cache=1", None)).await;
    assert_eq!(x_cache.as_deref(), Some("HIT"));
}

#[tokio::test]
async fn operator_domain_delete_spares_other_domains() {
    let h = harness(CacheConfig::default());
    send(&h.app, get("/a/", None)).await;
    send(&h.app, get("/", None)).await;
    h.store
        .hset("example.com.au:single", "/a/", Bytes::from_static(b"other"))
        .await
        .expect("seed");

    let (_, x_cache, _) = send(&h.app, get("/?delete-domain-cache", Some(OPERATOR))).await;
    assert_eq!(x_cache.as_deref(), Some("PURGE"));

    assert!(h
        .store
        .keys(&keys().domain_pattern())
        .await
        .expect("keys")
        .is_empty());
    assert!(h.store.exists("example.com.au:single").await.expect("exists"));
}

#[tokio::test]
async fn memory_ceiling_flushes_on_next_request() {
    let h = harness(CacheConfig {
        memory_limit: Some(1024),
        ..Default::default()
    });
    send(&h.app, get("/a/", None)).await;
    assert!(!h.store.is_empty());

    h.store.pin_used_memory(Some(4096));
    let (status, x_cache, body) = send(&h.app, get("/a/", Some(OPERATOR))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache.as_deref(), Some("PURGE"));
    assert_eq!(&body[..], b"<p>/a/</p>");
    assert!(h.store.is_empty(), "flush does not store the fresh render");

    h.store.pin_used_memory(Some(512));
    let (_, x_cache, _) = send(&h.app, get("/a/", None)).await;
    assert_eq!(x_cache.as_deref(), Some("MISS"));
}

#[tokio::test]
async fn debug_comment_is_appended_but_never_stored() {
    let h = harness(CacheConfig {
        debug_comment: true,
        site_name: "Blog".to_string(),
        ..Default::default()
    });

    let (_, _, first) = send(&h.app, get("/a/", None)).await;
    let first = String::from_utf8(first.to_vec()).expect("utf8");
    assert!(first.starts_with("<p>/a/</p><!-- Blog Cache: [ cache is set: "));

    let stored = cached(&h.store, Namespace::Single, "/a/").await.expect("stored");
    assert_eq!(&stored[..], b"<p>/a/</p>");

    let (_, _, second) = send(&h.app, get("/a/", None)).await;
    let second = String::from_utf8(second.to_vec()).expect("utf8");
    assert!(second.contains("[ this is a cache: "));
    assert!(second.ends_with(" ] -->"));

    let (_, _, json) = send(&h.app, get("/data/", None)).await;
    assert_eq!(&json[..], b"{}");
}

#[tokio::test]
async fn disabled_cache_is_a_pass_through() {
    let h = harness(CacheConfig {
        enabled: false,
        ..Default::default()
    });
    let (status, x_cache, _) = send(&h.app, get("/a/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache, None);
    assert!(h.store.is_empty());
}

struct Down;

#[async_trait]
impl KvStore for Down {
    async fn hget(&self, _: &str, _: &str) -> Result<Option<Bytes>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn hset(&self, _: &str, _: &str, _: Bytes) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn hdel(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn hexists(&self, _: &str, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn exists(&self, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn del(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn keys(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn sadd(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn smembers(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn expire_at(&self, _: &str, _: i64) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn info(&self) -> Result<StoreInfo, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn unavailable_store_fails_open() {
    let renders = Arc::new(AtomicUsize::new(0));
    let config = CacheConfig {
        memory_limit: Some(1024),
        ..Default::default()
    };
    let state = CacheState::new(config, Arc::new(Down), None);
    let app = build_public_router(origin(renders.clone()), Some(state));

    for cookie in [None, Some(OPERATOR)] {
        let (status, x_cache, body) = send(&app, get("/a/?delete-domain-cache", cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("BYPASS"));
        assert_eq!(&body[..], b"<p>/a/</p>");
    }
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_redis_serves_uncached_pages() {
    let renders = Arc::new(AtomicUsize::new(0));
    let store = RedisStore::open("redis://127.0.0.1:1/").expect("url should parse");
    let state = CacheState::new(CacheConfig::default(), Arc::new(store), None);
    let app = build_public_router(origin(renders.clone()), Some(state));

    for _ in 0..2 {
        let (status, x_cache, body) = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            send(&app, get("/a/", None)),
        )
        .await
        .expect("request must not wait on the store");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("BYPASS"));
        assert_eq!(&body[..], b"<p>/a/</p>");
    }
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn hit_is_served_as_html() {
    let h = harness(CacheConfig::default());
    send(&h.app, get("/a/", None)).await;

    let response = h
        .app
        .clone()
        .oneshot(get("/a/", None))
        .await
        .expect("response");
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE),
        Some(&HeaderValue::from_static("text/html; charset=utf-8"))
    );
}
