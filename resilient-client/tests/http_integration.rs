//! Integration tests for resilient-client against a mock HTTP server

use resilient_client::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: u32,
    name: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(base_url: impl Into<String>, policy: CachePolicy) -> ClientConfig {
    ClientConfig::builder()
        .base_url(base_url)
        .retry(RetryConfig::disabled())
        .default_cache_policy(policy)
        .connect_timeout(Duration::from_millis(500))
        .build()
}

fn client(server: &MockServer, policy: CachePolicy) -> NetworkClient {
    NetworkClient::new(config(server.uri(), policy)).unwrap()
}

#[tokio::test]
async fn test_successful_json_request() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Request-Id", "req-42")
                .set_body_json(json!({"id": 1, "name": "widget"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NoCache);
    let (item, meta) = client
        .get("/items/1")
        .send_json::<Item>()
        .await
        .into_result()
        .unwrap();

    assert_eq!(item.name, "widget");
    assert_eq!(meta.status_code, 200);
    assert_eq!(meta.request_id.as_deref(), Some("req-42"));
    assert!(!meta.from_cache);
    assert_eq!(client.breaker_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_etag_revalidation_serves_cached_body() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!([{"id": 1, "name": "widget"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NetworkFirst);

    let first = client.get("/items").send_json::<Vec<Item>>().await;
    assert_eq!(first.meta().unwrap().etag.as_deref(), Some("\"v1\""));

    let (items, meta) = client
        .get("/items")
        .send_json::<Vec<Item>>()
        .await
        .into_result()
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(meta.status_code, 304);
    assert!(meta.from_cache);

    // The 304 did not overwrite the stored entry.
    let key = CacheKey::new(Method::GET, format!("{}/items", server.uri()));
    let stored = client.cache().read::<Vec<Item>>(&key).await.unwrap();
    assert_eq!(stored.meta.status_code, 200);
}

#[tokio::test]
async fn test_no_cache_policy_never_stores() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!({"id": 1, "name": "widget"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NoCache);
    for _ in 0..2 {
        assert!(client.get("/items/1").send_json::<Item>().await.is_success());
    }

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests
            .iter()
            .all(|r| !r.headers.contains_key("if-none-match"))
    );
    assert_eq!(client.invalidate_cache(None).await, 0);
}

#[tokio::test]
async fn test_cache_first_skips_network_on_hit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3, "name": "gear"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::CacheFirst);
    let first = client.get("/items/3").send_json::<Item>().await;
    assert!(!first.meta().unwrap().from_cache);

    let second = client.get("/items/3").send_json::<Item>().await;
    assert_eq!(second.value().unwrap().id, 3);
    assert!(second.meta().unwrap().from_cache);
}

#[tokio::test]
async fn test_invalidate_by_path_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "a"})))
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::CacheFirst);
    client.get("/items/1").send_json::<Item>().await;
    client.get("/items/2").send_json::<Item>().await;
    client.get("/users/1").send_json::<Item>().await;

    assert_eq!(client.invalidate_cache(Some("items")).await, 2);
    assert_eq!(client.invalidate_cache(Some("/items")).await, 0);
    assert_eq!(client.invalidate_cache(None).await, 1);
}

#[tokio::test]
async fn test_network_first_falls_back_when_unreachable() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "name": "cached"})))
        .mount(&server)
        .await;

    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let online = NetworkClient::builder()
        .config(config(server.uri(), CachePolicy::NetworkFirst))
        .cache_store(store.clone())
        .build()
        .unwrap();
    assert!(
        online
            .get("/feed")
            .cache_key("feed")
            .send_json::<Item>()
            .await
            .is_success()
    );

    let unreachable = NetworkClient::builder()
        .config(config("http://127.0.0.1:9", CachePolicy::NetworkFirst))
        .cache_store(store)
        .build()
        .unwrap();
    let outcome = unreachable
        .get("/feed")
        .cache_key("feed")
        .send_json::<Item>()
        .await;

    let (item, meta) = outcome.into_result().unwrap();
    assert_eq!(item.name, "cached");
    assert!(meta.from_cache);
}

#[tokio::test]
async fn test_unreachable_without_cache_is_network_failure() {
    let client = NetworkClient::new(config("http://127.0.0.1:9", CachePolicy::NoCache)).unwrap();
    let outcome = client.get("/feed").send_json::<Item>().await;

    let error = outcome.error().unwrap();
    assert!(matches!(error, AppError::Network { .. } | AppError::Timeout { .. }));
    assert_eq!(client.circuit_breaker().failure_count(), 1);
}

#[tokio::test]
async fn test_retries_transient_status() {
    init_tracing();
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    Mock::given(method("GET"))
        .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"id": 5, "name": "late"}))
            }
        })
        .expect(3)
        .mount(&server)
        .await;

    let client = NetworkClient::new(
        ClientConfig::builder()
            .base_url(server.uri())
            .retry(
                RetryConfig::exponential(3, Duration::from_millis(10))
                    .with_jitter(Duration::ZERO),
            )
            .build(),
    )
    .unwrap();

    let outcome = client.get("/items/5").send_json::<Item>().await;
    assert_eq!(outcome.value().unwrap().name, "late");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(client.circuit_breaker().failure_count(), 0);
}

#[tokio::test]
async fn test_server_error_counts_against_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("x-request-id", "req-500")
                .set_body_string("boom"),
        )
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NoCache);

    let outcome = client.get("/items").send_json::<Vec<Item>>().await;
    match outcome.error().unwrap() {
        AppError::Server {
            status_code,
            body,
            request_id,
            ..
        } => {
            assert_eq!(*status_code, 500);
            assert_eq!(body, "boom");
            assert_eq!(request_id.as_deref(), Some("req-500"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.circuit_breaker().failure_count(), 1);
}

#[tokio::test]
async fn test_breaker_opens_and_rejects_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let client = NetworkClient::new(
        ClientConfig::builder()
            .base_url(server.uri())
            .retry(RetryConfig::disabled())
            .circuit_breaker(CircuitPolicy::new(2, Duration::from_secs(30)))
            .build(),
    )
    .unwrap();

    client.get("/a").send_json::<Item>().await;
    client.get("/a").send_json::<Item>().await;
    assert_eq!(client.breaker_state(), CircuitState::Open);

    let rejected = client.get("/a").send_json::<Item>().await;
    let error = rejected.error().unwrap();
    assert!(error.is_circuit_open());
    assert_eq!(error.code(), Some(codes::CIRCUIT_OPEN));
}

#[tokio::test]
async fn test_rate_limited_reports_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NoCache);
    let outcome = client.get("/items").send_json::<Vec<Item>>().await;

    match outcome.error().unwrap() {
        AppError::RateLimited {
            retry_after_seconds,
            ..
        } => assert_eq!(*retry_after_seconds, Some(7)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_network_first_serves_cache_for_retryable_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "fresh"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NetworkFirst);
    assert!(client.get("/items/1").send_json::<Item>().await.is_success());

    let outcome = client.get("/items/1").send_json::<Item>().await;
    assert_eq!(outcome.value().unwrap().name, "fresh");
    assert!(outcome.meta().unwrap().from_cache);
    assert_eq!(client.breaker_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_not_found_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NetworkFirst);
    let outcome = client.get("/missing").send_json::<Item>().await;

    let error = outcome.error().unwrap();
    assert_eq!(error.status_code(), Some(404));
    assert_eq!(error.code(), Some("HTTP_404"));
}

#[tokio::test]
async fn test_pagination_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Page", "2")
                .insert_header("X-Page-Size", "20")
                .insert_header("X-Next-Page", "3")
                .insert_header("X-Total", "55")
                .set_body_json(json!([])),
        )
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NoCache);
    let outcome = client
        .get("/items")
        .query("page", "2")
        .send_json::<Vec<Item>>()
        .await;

    assert_eq!(
        outcome.meta().unwrap().pagination,
        Some(Pagination::Paged {
            page: Some(2),
            page_size: Some(20),
            next_page: Some(3),
            prev_page: None,
            total: Some(55),
        })
    );
}

#[tokio::test]
async fn test_envelope_business_error_leaves_breaker_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": {"code": "INSUFFICIENT_FUNDS", "message": "Not enough credit"}
        })))
        .mount(&server)
        .await;

    let client = NetworkClient::new(
        ClientConfig::builder()
            .base_url(server.uri())
            .circuit_breaker(CircuitPolicy::new(1, Duration::from_secs(30)))
            .build(),
    )
    .unwrap();

    for _ in 0..3 {
        let outcome = client
            .post("/payments")
            .json(&json!({"amount": 10}))
            .send_envelope::<Item>()
            .await;
        match outcome.error().unwrap() {
            AppError::Business { message, code, .. } => {
                assert_eq!(message, "Not enough credit");
                assert_eq!(code.as_deref(), Some("INSUFFICIENT_FUNDS"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(client.breaker_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_malformed_body_is_parsing_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NetworkFirst);
    let outcome = client.get("/items/1").send_json::<Item>().await;

    assert!(matches!(outcome.error(), Some(AppError::Parsing { .. })));
    assert_eq!(client.invalidate_cache(None).await, 0);
}

#[tokio::test]
async fn test_default_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-app", "demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "a"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = NetworkClient::new(
        ClientConfig::builder()
            .base_url(server.uri())
            .default_header("X-App", "demo")
            .build(),
    )
    .unwrap();

    assert!(client.get("/items/1").send_json::<Item>().await.is_success());
}

/// Store whose body writes always fail.
struct ReadOnlyBodies {
    inner: MemoryCacheStore,
}

#[async_trait::async_trait]
impl CacheStore for ReadOnlyBodies {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<StoredEntry>> {
        self.inner.get(key).await
    }

    async fn put(&self, _key: &CacheKey, _entry: StoredEntry) -> CacheResult<()> {
        Err(CacheError::Backend("disk full".to_string()))
    }

    async fn get_etag(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        self.inner.get_etag(key).await
    }

    async fn put_etag(&self, key: &CacheKey, etag: String) -> CacheResult<()> {
        self.inner.put_etag(key, etag).await
    }

    async fn delete_etag(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner.delete_etag(key).await
    }

    async fn invalidate(&self, prefix: Option<&str>) -> CacheResult<usize> {
        self.inner.invalidate(prefix).await
    }
}

#[tokio::test]
async fn test_etag_not_kept_when_body_write_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("if-none-match", "\"abc\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"abc\"")
                .set_body_json(json!({"id": 1, "name": "widget"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(ReadOnlyBodies {
        inner: MemoryCacheStore::new(),
    });
    let client = NetworkClient::builder()
        .config(config(server.uri(), CachePolicy::NetworkFirst))
        .cache_store(store.clone())
        .build()
        .unwrap();

    for _ in 0..2 {
        let outcome = client.get("/items/1").send_json::<Item>().await;
        assert_eq!(outcome.value().unwrap().name, "widget");
    }
    let key = CacheKey::new(Method::GET, format!("{}/items/1", server.uri()));
    assert_eq!(store.get_etag(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_response_without_etag_clears_stored_validator() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    Mock::given(method("GET"))
        .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
            let body = json!({"id": 1, "name": "widget"});
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .set_body_json(body)
            } else {
                ResponseTemplate::new(200).set_body_json(body)
            }
        })
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NetworkFirst);
    for _ in 0..3 {
        assert!(client.get("/items/1").send_json::<Item>().await.is_success());
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].headers.contains_key("if-none-match"));
    assert!(!requests[2].headers.contains_key("if-none-match"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_send_bytes_returns_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 159, 146, 150]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, CachePolicy::NoCache);
    let (body, meta) = client.get("/blob").send_bytes().await.into_result().unwrap();

    assert_eq!(body, vec![0u8, 159, 146, 150]);
    assert_eq!(meta.status_code, 200);
}
