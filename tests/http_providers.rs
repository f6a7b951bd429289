//! The OpenAI embedding provider and the Airtable adapter against local
//! axum servers that mimic the remote APIs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use codectx::config::{AirtableSourceConfig, EmbeddingConfig};
use codectx::connector_table::AirtableAdapter;
use codectx::embedding::{client_with_provider, OpenAIProvider};
use codectx_core::embedding::EmbeddingProvider;
use codectx_core::models::{Project, SourceType};
use codectx_core::source::SourceAdapter;
use codectx_core::Error;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[derive(Clone)]
struct Mock {
    hits: Arc<AtomicUsize>,
    /// Responses with this status precede the first success.
    failures: usize,
    status: StatusCode,
}

impl Mock {
    fn new(failures: usize, status: StatusCode) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            failures,
            status,
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Answers with `[i, 1.0]` for input `i`, listing items in reverse order.
async fn embeddings(
    State(mock): State<Mock>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let n = mock.hits.fetch_add(1, Ordering::SeqCst);
    if n < mock.failures {
        return (mock.status, Json(json!({"error": {"message": "mock failure"}})));
    }
    if headers.get("authorization").and_then(|h| h.to_str().ok()) != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }

    let inputs = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
    let data: Vec<Value> = (0..inputs)
        .rev()
        .map(|i| json!({"index": i, "embedding": [i as f32, 1.0]}))
        .collect();
    (StatusCode::OK, Json(json!({"data": data, "model": body["model"]})))
}

async fn openai(failures: usize, status: StatusCode) -> (Mock, EmbeddingConfig) {
    let mock = Mock::new(failures, status);
    let app = Router::new()
        .route("/embeddings", post(embeddings))
        .with_state(mock.clone());
    let addr = serve(app).await;
    let config = EmbeddingConfig {
        base_url: format!("http://{}", addr),
        dims: 2,
        batch_pause_ms: 0,
        ..EmbeddingConfig::default()
    };
    (mock, config)
}

fn provider(config: &EmbeddingConfig) -> OpenAIProvider {
    OpenAIProvider::new(config, "sk-test".to_string())
        .unwrap()
        .with_backoff_unit(Duration::from_millis(1))
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("input {}", i)).collect()
}

#[tokio::test]
async fn test_openai_orders_vectors_by_index() {
    let (mock, config) = openai(0, StatusCode::OK).await;
    let vectors = provider(&config).embed_batch(&texts(3)).await.unwrap();
    assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_openai_retries_rate_limit() {
    let (mock, config) = openai(2, StatusCode::TOO_MANY_REQUESTS).await;
    let vectors = provider(&config).embed_batch(&texts(1)).await.unwrap();
    assert_eq!(vectors, vec![vec![0.0, 1.0]]);
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn test_openai_retries_server_errors_then_gives_up() {
    let (mock, config) = openai(usize::MAX, StatusCode::BAD_GATEWAY).await;
    let err = provider(&config).embed_batch(&texts(1)).await.unwrap_err();
    assert!(err.to_string().contains("502"), "unexpected error: {}", err);
    assert_eq!(mock.hits(), config.max_retries as usize + 1);
}

#[tokio::test]
async fn test_openai_client_error_is_not_retried() {
    let (mock, config) = openai(usize::MAX, StatusCode::BAD_REQUEST).await;
    let err = provider(&config).embed_batch(&texts(1)).await.unwrap_err();
    assert!(err.to_string().contains("400"));
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_client_batches_requests() {
    let (mock, mut config) = openai(0, StatusCode::OK).await;
    config.batch_size = 2;
    let client = client_with_provider(&config, Box::new(provider(&config)));

    let vectors = client.embed_many(&texts(5)).await.unwrap();
    assert_eq!(vectors.len(), 5);
    // Each batch restarts its indices at zero.
    assert_eq!(vectors[4], vec![0.0, 1.0]);
    assert_eq!(vectors[3], vec![1.0, 1.0]);
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn test_client_reports_failing_batch_offset() {
    let (_mock, mut config) = openai(usize::MAX, StatusCode::UNPROCESSABLE_ENTITY).await;
    config.batch_size = 2;
    let client = client_with_provider(&config, Box::new(provider(&config)));

    let failure = client.embed_many(&texts(3)).await.unwrap_err();
    assert_eq!(failure.offset, 0);
    assert!(failure.message.contains("422"));
}

/// Two pages of `Tasks` (cursor `page-2`); any other table is missing.
async fn airtable_records(
    Path((base, table)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").and_then(|h| h.to_str().ok()) != Some("Bearer pat-test") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "AUTHENTICATION_REQUIRED"})));
    }
    if base != "appTEST" || table != "Tasks" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "NOT_FOUND"})));
    }
    assert_eq!(params.get("pageSize").map(String::as_str), Some("2"));

    match params.get("offset").map(String::as_str) {
        None => (
            StatusCode::OK,
            Json(json!({
                "records": [
                    {"id": "rec1", "createdTime": "2024-03-01T10:00:00.000Z",
                     "fields": {"Name": "Fix login", "Status": "Open", "Points": 3}},
                    {"id": "rec2", "fields": {"Name": "Add export"}}
                ],
                "offset": "page-2"
            })),
        ),
        Some("page-2") => (
            StatusCode::OK,
            Json(json!({
                "records": [
                    {"id": "rec3", "fields": {"Name": "Write docs", "Notes": "for v2"}}
                ]
            })),
        ),
        Some(_) => (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": "bad offset"}))),
    }
}

fn project() -> Project {
    Project {
        id: "p1".to_string(),
        name: "atlas".to_string(),
        description: String::new(),
        tech_stack: Vec::new(),
        repo_url: None,
        config: json!({}),
        created_at: 0,
        updated_at: 0,
    }
}

#[tokio::test]
async fn test_airtable_follows_offset_and_isolates_failed_tables() {
    let app = Router::new().route("/{base}/{table}", get(airtable_records));
    let addr = serve(app).await;
    let config = AirtableSourceConfig {
        base_id: Some("appTEST".to_string()),
        api_url: format!("http://{}", addr),
        page_size: 2,
        source_type: SourceType::Design,
        ..AirtableSourceConfig::default()
    };
    let adapter = AirtableAdapter::new(
        &config,
        vec!["Tasks".to_string(), "Missing".to_string()],
        "pat-test".to_string(),
    )
    .unwrap();

    let docs = adapter.list_documents(&project()).await.unwrap();
    assert_eq!(docs.len(), 4);

    let ok: Vec<_> = docs.iter().filter_map(|d| d.as_ref().ok()).collect();
    let paths: Vec<&str> = ok.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, vec!["airtable/Tasks/rec1", "airtable/Tasks/rec2", "airtable/Tasks/rec3"]);
    assert!(ok.iter().all(|d| d.source_type == SourceType::Design));
    assert_eq!(ok[0].text, "Name: Fix login\nStatus: Open");
    assert!(ok[0].modified_at.is_some());
    assert!(ok[1].modified_at.is_none());

    match &docs[3] {
        Err(Error::SourceRead { path, message }) => {
            assert_eq!(path, "airtable/Missing");
            assert!(message.contains("404"));
        }
        other => panic!("expected a read failure, got {:?}", other),
    }
}
