//! HTTP-level tests: the Ollama client against a local mock, and the
//! datalk API end to end with a scripted oracle.

use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use datalk::config::Config;
use datalk::db;
use datalk::error::{OracleError, TranslationError};
use datalk::migrate::ensure_schema;
use datalk::oracle::{OllamaOracle, Oracle};
use datalk::schema::STORES;
use datalk::server::{router, AppState};
use datalk::store::{DocumentStore, SqliteStore};
use datalk::translate::translate;

// ─── Helpers ────────────────────────────────────────────────────────

/// Serve `app` on an ephemeral port and return its base URL.
async fn spawn(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{}", addr), handle)
}

/// A fake Ollama `/api/generate` that always answers `text`.
fn mock_ollama(text: &'static str) -> Router {
    Router::new().route(
        "/api/generate",
        post(move |Json(body): Json<Value>| async move {
            assert_eq!(body["stream"], false);
            assert!(body["prompt"].as_str().unwrap().contains("Question:"));
            Json(json!({"model": body["model"], "response": text, "done": true}))
        }),
    )
}

struct Scripted(&'static str);

#[async_trait]
impl Oracle for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Ok(self.0.to_string())
    }
}

struct TimingOut;

#[async_trait]
impl Oracle for TimingOut {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Err(OracleError::Timeout(Duration::from_secs(60)))
    }
}

async fn api(tmp: &TempDir, oracle: Arc<dyn Oracle>) -> (String, tokio::task::JoinHandle<()>) {
    let db_path = tmp.path().join("datalk.sqlite");
    let pool = db::connect_path(&db_path).await.unwrap();
    let store = SqliteStore::new(pool);
    ensure_schema(&store).await.unwrap();

    let state = AppState::new(Config::with_db_path(db_path), Arc::new(store), oracle);
    spawn(router(state)).await
}

fn store_body(id: i64, segment: &str, price: f64) -> Value {
    json!({
        "store_id": id,
        "hub_id": 2,
        "store_name": format!("STORE {}", id),
        "store_segment": segment,
        "store_plan_price": price,
        "store_latitude": -30.0374149,
        "store_longitude": -51.20352
    })
}

// ─── Oracle client ──────────────────────────────────────────────────

#[tokio::test]
async fn ollama_oracle_reads_response_text() {
    let (base, handle) = spawn(mock_ollama("Sure: {\"store_segment\": \"Pizza\"} ok")).await;
    let oracle = OllamaOracle::new(
        format!("{}/api/generate", base),
        "mistral",
        Duration::from_secs(5),
    )
    .unwrap();

    let translated = translate(&oracle, &STORES, "pizza places").await.unwrap();
    assert_eq!(translated.filter.to_json(), json!({"store_segment": "Pizza"}));

    handle.abort();
}

#[tokio::test]
async fn ollama_oracle_times_out() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"response": "{}"}))
        }),
    );
    let (base, handle) = spawn(app).await;
    let oracle = OllamaOracle::new(
        format!("{}/api/generate", base),
        "mistral",
        Duration::from_millis(200),
    )
    .unwrap();

    let err = oracle.complete("anything").await.unwrap_err();
    assert!(matches!(err, OracleError::Timeout(_)), "got {err:?}");

    handle.abort();
}

#[tokio::test]
async fn ollama_oracle_unreachable() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let oracle = OllamaOracle::new(
        format!("http://127.0.0.1:{}/api/generate", port),
        "mistral",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = translate(&oracle, &STORES, "pizza").await.unwrap_err();
    assert!(
        matches!(err, TranslationError::Oracle(OracleError::Unreachable { .. })),
        "got {err:?}"
    );
}

#[tokio::test]
async fn ollama_oracle_error_status() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            (
                axum::http::StatusCode::NOT_FOUND,
                Json(json!({"error": "model 'mistral' not found"})),
            )
        }),
    );
    let (base, handle) = spawn(app).await;
    let oracle = OllamaOracle::new(
        format!("{}/api/generate", base),
        "mistral",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = oracle.complete("anything").await.unwrap_err();
    match err {
        OracleError::Status { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    handle.abort();
}

// ─── API ────────────────────────────────────────────────────────────

#[tokio::test]
async fn store_crud_over_http() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = api(&tmp, Arc::new(Scripted("{}"))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/stores", base))
        .json(&store_body(1, "FOOD", 49.0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{}/stores", base))
        .json(&store_body(1, "FOOD", 49.0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "duplicate_key");

    let doc: Value = client
        .get(format!("{}/stores/1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["store_name"], "STORE 1");

    let resp = client
        .put(format!("{}/stores/1", base))
        .json(&store_body(2, "FOOD", 49.0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .put(format!("{}/stores/1", base))
        .json(&store_body(1, "GOOD", 99.0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{}/stores/1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client.get(format!("{}/stores/1", base)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/stores", base))
        .json(&json!({"store_id": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handle.abort();
}

#[tokio::test]
async fn ask_runs_translated_filter() {
    let tmp = TempDir::new().unwrap();
    let oracle = Scripted("Here you go:\n{\"store_plan_price\": {\"$gt\": 100}}\n");
    let (base, handle) = api(&tmp, Arc::new(oracle)).await;
    let client = reqwest::Client::new();

    for (id, price) in [(1, 49.0), (2, 149.0), (3, 199.0)] {
        let resp = client
            .post(format!("{}/stores", base))
            .json(&store_body(id, "FOOD", price))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let resp = client
        .post(format!("{}/ask/stores", base))
        .json(&json!({"prompt": "expensive stores"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["prompt"], "expensive stores");
    assert_eq!(body["query"], json!({"store_plan_price": {"$gt": 100.0}}));
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    let resp = client
        .post(format!("{}/ask/customers", base))
        .json(&json!({"prompt": "anyone"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    handle.abort();
}

#[tokio::test]
async fn ask_caps_results_at_default_limit() {
    let tmp = TempDir::new().unwrap();
    let oracle = Scripted("{\"store_segment\": \"FOOD\"}");
    let (base, handle) = api(&tmp, Arc::new(oracle)).await;
    let client = reqwest::Client::new();

    for id in 1..=8 {
        let resp = client
            .post(format!("{}/stores", base))
            .json(&store_body(id, "FOOD", 10.0))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let resp = client
        .post(format!("{}/ask/stores", base))
        .json(&json!({"prompt": "food stores"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    let ids: Vec<i64> = results
        .iter()
        .map(|doc| doc["store_id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    handle.abort();
}

#[tokio::test]
async fn ask_rejects_unknown_field_without_querying() {
    let tmp = TempDir::new().unwrap();
    let oracle = Scripted("{\"store_owner\": \"bob\"}");
    let (base, handle) = api(&tmp, Arc::new(oracle)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ask/stores", base))
        .json(&json!({"prompt": "bob's stores"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "translation_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("store_owner"));

    handle.abort();
}

#[tokio::test]
async fn ask_maps_oracle_timeout_to_504() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = api(&tmp, Arc::new(TimingOut)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/ask/stores", base))
        .json(&json!({"prompt": "anything"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "oracle_timeout");

    handle.abort();
}

#[tokio::test]
async fn orders_listing_and_health() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = api(&tmp, Arc::new(Scripted("{}"))).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let body: Value = client
        .get(format!("{}/orders?store_id=3512&order_status=FINISHED", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body["query"],
        json!({"store_id": 3512, "order_status": "FINISHED"})
    );
    assert!(body["results"].as_array().unwrap().is_empty());

    let resp = client
        .get(format!("{}/orders?limit=0", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{}/orders?store_id=abc", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handle.abort();
}
