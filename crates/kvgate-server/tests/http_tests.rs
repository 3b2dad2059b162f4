// HTTP surface tests against a live server on an ephemeral port

use kvgate_server::{app, AppState};
use kvgate_store::{Backend, KeyNormalizer, MemoryBackend, StoreConfig, StoreError, TypedStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    url: String,
    backend: MemoryBackend,
    client: reqwest::Client,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(lenient_values: bool) -> Self {
        Self::start_configured(StoreConfig::default(), lenient_values).await
    }

    async fn start_configured(config: StoreConfig, lenient_values: bool) -> Self {
        let backend = MemoryBackend::new();
        let shared: Arc<dyn Backend> = Arc::new(backend.clone());
        let store = TypedStore::new(shared, config);
        let state = AppState::new(store).with_lenient_values(lenient_values);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app(state))
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            url: format!("http://127.0.0.1:{}", port),
            backend,
            client: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.url, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.url, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_string_set_and_get() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/string/set", json!({"key": "user:1", "value": "lapshin", "ttl": 0}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"result": "OK", "error": ""}));

    let (status, body) = server.get("/string/get?key=user:1").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "lapshin");
}

#[tokio::test]
async fn test_missing_string_is_404() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/string/get?key=nobody").await;
    assert_eq!(status, 404);
    assert_eq!(body["result"], Value::Null);
    assert!(body["error"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_missing_query_param_is_400() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/string/get").await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("key"));
}

#[tokio::test]
async fn test_negative_ttl_is_400_without_backend_call() {
    let server = TestServer::start().await;

    let (status, _) = server
        .post("/string/set", json!({"key": "k", "value": "v", "ttl": -5}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(server.backend.call_count(), 0);
}

#[tokio::test]
async fn test_null_key_rejected_before_handler() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/del", json!({})).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("Invalid key"));
    assert_eq!(server.backend.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_422() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(format!("{}/string/set", server.url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], Value::Null);
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_hash_routes() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(
            "/hash/set",
            json!({"key": {"id": 1}, "value": {"name": "Ivan", "age": 21}, "ttl": 1}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "success");
    assert!(server.backend.ttl(r#"{"id":1}"#).is_some());

    let (status, body) = server.get("/hash/get?key=%7B%22id%22%3A1%7D").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!({"name": "Ivan", "age": "21"}));

    let (status, body) = server
        .post("/hash/field", json!({"key": "h", "value": {"a": "1", "b": "2"}}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], 2);

    let (status, body) = server.get("/hash/field?key=h&field=b").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "2");

    let (status, _) = server.get("/hash/field?key=h").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_empty_hash_rejected() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/hash/set", json!({"key": "h", "value": {}, "ttl": 0}))
        .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("Empty key or value"));
}

#[tokio::test]
async fn test_list_routes() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/list/set", json!({"key": 7, "value": [3, "123", {"key": 1}], "ttl": 0}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "success");

    let (status, body) = server.get("/list/get?key=7").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!([3, "123", {"key": 1}]));

    let (status, body) = server
        .post("/list/index", json!({"key": 7, "index": 1, "value": 42}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "OK");

    let (status, body) = server.get("/list/range?key=7&start=0&stop=1").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!([3, 42]));

    let (status, _) = server.get("/list/range?key=7&start=abc").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_list_index_out_of_range_is_422() {
    let server = TestServer::start().await;
    server
        .post("/list/set", json!({"key": "l", "value": ["a"], "ttl": 0}))
        .await;

    let (status, body) = server
        .post("/list/index", json!({"key": "l", "index": 5, "value": "b"}))
        .await;
    assert_eq!(status, 422);
    assert!(body["error"].as_str().unwrap().contains("out of range"));
}

#[tokio::test]
async fn test_strict_and_lenient_values() {
    let strict = TestServer::start().await;
    let (status, _) = strict
        .post("/list/set", json!({"key": "l", "value": [true], "ttl": 0}))
        .await;
    assert_eq!(status, 400);

    let lenient = TestServer::start_with(true).await;
    let (status, _) = lenient
        .post("/list/set", json!({"key": "l", "value": [true, null], "ttl": 0}))
        .await;
    assert_eq!(status, 200);
    let (_, body) = lenient.get("/list/get?key=l").await;
    assert_eq!(body["result"], json!(["true", "null"]));
}

#[tokio::test]
async fn test_nested_list_rejected() {
    let server = TestServer::start().await;

    let (status, _) = server
        .post("/list/set", json!({"key": "l", "value": [1, [2]], "ttl": 0}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(server.backend.call_count(), 0);
}

#[tokio::test]
async fn test_keys_and_delete() {
    let server = TestServer::start().await;
    for key in ["user:2", "user:1", "order:1"] {
        server
            .post("/string/set", json!({"key": key, "value": "x", "ttl": 0}))
            .await;
    }

    let (status, body) = server.get("/keys?pattern=user:*").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!(["user:1", "user:2"]));

    let (status, body) = server.post("/del", json!({"key": "user:1"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], 1);

    let (_, body) = server.post("/del", json!({"key": "user:1"})).await;
    assert_eq!(body["result"], 0);
}

#[tokio::test]
async fn test_tagged_keys_readable_from_query() {
    let config = StoreConfig::default().with_keys(KeyNormalizer::tagged());
    let server = TestServer::start_configured(config, false).await;

    for (key, value) in [(json!(42), "number"), (json!("42"), "text")] {
        let (status, _) = server
            .post("/string/set", json!({"key": key, "value": value, "ttl": 0}))
            .await;
        assert_eq!(status, 200);
    }
    server
        .post(
            "/hash/set",
            json!({"key": {"id": 1}, "value": {"name": "Ivan"}, "ttl": 0}),
        )
        .await;
    server
        .post("/list/set", json!({"key": 7, "value": [1, 2], "ttl": 0}))
        .await;

    let (status, body) = server.get("/string/get?key=42").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "number");

    let (_, body) = server.get("/string/get?key=%2242%22").await;
    assert_eq!(body["result"], "text");

    let (status, body) = server.get("/hash/get?key=%7B%22id%22%3A1%7D").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!({"name": "Ivan"}));

    let (_, body) = server.get("/hash/field?key=%7B%22id%22%3A1%7D&field=name").await;
    assert_eq!(body["result"], "Ivan");

    let (_, body) = server.get("/list/range?key=7&start=1").await;
    assert_eq!(body["result"], json!([2]));

    // keys as listed can be fetched back
    let (_, body) = server.get("/keys?pattern=i:*").await;
    assert_eq!(body["result"], json!(["i:42", "i:7"]));
    let (status, body) = server.get("/list/get?key=i:7").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!([1, 2]));
}

#[tokio::test]
async fn test_corrupt_list_element_is_500() {
    let server = TestServer::start().await;
    server.backend.push_raw("l", "not an element");

    let (status, body) = server.get("/list/get?key=l").await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("Malformed"));
}

#[tokio::test]
async fn test_partial_write_is_500() {
    let server = TestServer::start().await;
    server
        .backend
        .fail_next("EXPIRE", StoreError::Backend("ERR expire rejected".to_string()));

    let (status, body) = server
        .post("/hash/set", json!({"key": "h", "value": {"a": 1}, "ttl": 5}))
        .await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("Partial write"));
}

#[tokio::test]
async fn test_conflict_is_409() {
    let server = TestServer::start().await;
    server.backend.inject_conflicts(10);

    let (status, _) = server
        .post("/list/set", json!({"key": "l", "value": [1], "ttl": 0}))
        .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_save_and_health() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/save", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "saved");

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], "ok");

    server
        .backend
        .fail_next("PING", StoreError::BackendUnavailable("down".to_string()));
    let (status, _) = server.get("/health").await;
    assert_eq!(status, 503);
}
