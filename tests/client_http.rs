//! HTTP behaviour of `QuipClient` against a local mock server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quip_mirror::config::{ApiConfig, RetryConfig, TraversalConfig};
use quip_mirror::contract::{ChildRef, ExportFormat, ThreadKind, Workspace};
use quip_mirror::error::ApiError;
use quip_mirror::synchronise::{synchronise, BranchFailureKind};
use quip_mirror::{FsStore, QuipClient, RateLimiter};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-token";

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

fn client_with(server: &MockServer, batch_size: usize, limiter: RateLimiter, retry: RetryConfig) -> QuipClient {
    let api = ApiConfig {
        base_url: format!("{}/1", server.uri()),
        token: TOKEN.to_string(),
        batch_size,
    };
    QuipClient::new(&api, Arc::new(limiter), retry).expect("client builds")
}

fn client(server: &MockServer) -> QuipClient {
    client_with(
        server,
        50,
        RateLimiter::new(100, Duration::from_millis(10)),
        fast_retry(3),
    )
}

fn thread_json(id: &str, title: &str, kind: &str) -> serde_json::Value {
    json!({
        "thread": { "id": id, "title": title, "type": kind },
        "html": format!("<p>{title}</p>")
    })
}

#[tokio::test]
async fn test_get_folder_sends_bearer_token_and_decodes_children() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/folders/F1"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folder": { "id": "F1", "title": "Team" },
            "children": [
                { "folder_id": "F2" },
                { "thread_id": "T1" },
                { "folder_id": "F3", "restricted": true },
                { "restricted": false, "thread_id": "T2" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let node = client(&server).get_folder("F1").await.expect("folder fetched");

    assert_eq!(node.id, "F1");
    assert_eq!(node.title, "Team");
    assert_eq!(
        node.children,
        vec![
            ChildRef::Folder { folder_id: "F2".into() },
            ChildRef::Thread { thread_id: "T1".into() },
            ChildRef::Restricted,
            ChildRef::Thread { thread_id: "T2".into() },
        ]
    );
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;
    for (id, status) in [("missing", 404u16), ("secret", 403), ("expired", 401), ("broken", 500)] {
        Mock::given(method("GET"))
            .and(path(format!("/1/folders/{id}")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    let client = client(&server);

    assert!(matches!(client.get_folder("missing").await, Err(ApiError::NotFound { .. })));
    assert!(matches!(client.get_folder("secret").await, Err(ApiError::Forbidden { .. })));
    assert!(matches!(client.get_folder("expired").await, Err(ApiError::Forbidden { .. })));
    assert!(matches!(
        client.get_folder("broken").await,
        Err(ApiError::Http { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/folders/F1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server).get_folder("F1").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let api = ApiConfig {
        base_url: "http://127.0.0.1:1/1".to_string(),
        token: TOKEN.to_string(),
        batch_size: 10,
    };
    let client = QuipClient::new(
        &api,
        Arc::new(RateLimiter::new(10, Duration::from_millis(10))),
        fast_retry(0),
    )
    .unwrap();

    let err = client.get_folder("F1").await.unwrap_err();
    assert!(matches!(err, ApiError::Transport { .. }));
}

#[tokio::test]
async fn test_rate_limited_response_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/folders/F1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/folders/F1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folder": { "id": "F1", "title": "After retry" },
            "children": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let node = client(&server).get_folder("F1").await.expect("retry succeeds");
    assert_eq!(node.title, "After retry");
}

#[tokio::test]
async fn test_retries_give_up_with_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/folders/F1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_with(
        &server,
        50,
        RateLimiter::new(100, Duration::from_millis(10)),
        fast_retry(2),
    );
    let err = client.get_folder("F1").await.unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_thread_batches_are_chunked_and_merged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .and(query_param("ids", "A,B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "A": thread_json("A", "Alpha", "document"),
            "B": thread_json("B", "Beta", "spreadsheet"),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .and(query_param("ids", "C"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "C": thread_json("C", "Gamma", "slides"),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(
        &server,
        2,
        RateLimiter::new(100, Duration::from_millis(10)),
        fast_retry(0),
    );
    let ids: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
    let batch = client.get_threads_batch(&ids).await;
    assert!(batch.failed.is_empty());
    let records = batch.records;

    assert_eq!(records.len(), 3);
    assert_eq!(records["A"].kind, ThreadKind::Document);
    assert_eq!(records["B"].kind, ThreadKind::Spreadsheet);
    assert_eq!(records["C"].title, "Gamma");
    assert_eq!(records["C"].html, "<p>Gamma</p>");
}

#[tokio::test]
async fn test_failed_chunk_does_not_discard_other_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .and(query_param("ids", "A,B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "A": thread_json("A", "Alpha", "document"),
            "B": thread_json("B", "Beta", "document"),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .and(query_param("ids", "C"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(
        &server,
        2,
        RateLimiter::new(100, Duration::from_millis(10)),
        fast_retry(0),
    );
    let ids: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
    let batch = client.get_threads_batch(&ids).await;

    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.records["A"].title, "Alpha");
    assert_eq!(batch.records["B"].title, "Beta");
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].thread_ids, vec!["C".to_string()]);
    assert!(matches!(batch.failed[0].error, ApiError::Http { status: 500, .. }));
    assert!(batch.is_failed("C"));
    assert!(!batch.is_failed("A"));
}

#[tokio::test]
async fn test_closed_limiter_is_not_reported_as_server_throttling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let limiter = RateLimiter::new(10, Duration::from_millis(10));
    limiter.close();
    let client = client_with(&server, 50, limiter, fast_retry(3));

    let err = client.get_folder("F1").await.unwrap_err();
    assert!(matches!(err, ApiError::Limiter { .. }));
    assert!(!err.is_rate_limited());
}

#[tokio::test]
async fn test_batch_accepts_data_wrapper_and_unknown_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "X": thread_json("X", "Chat", "chat") }
        })))
        .mount(&server)
        .await;

    let records = client(&server)
        .get_threads_batch(&["X".to_string()])
        .await
        .records;
    assert_eq!(records["X"].kind, ThreadKind::Other);
    assert_eq!(records["X"].kind.export_format(), ExportFormat::Pdf);
}

#[tokio::test]
async fn test_export_returns_raw_bytes() {
    let server = MockServer::start().await;
    let payload = vec![0x50, 0x4b, 0x03, 0x04, 0x00, 0xff];
    Mock::given(method("GET"))
        .and(path("/1/threads/T1/export/docx"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let artifact = client(&server)
        .export_thread("T1", ExportFormat::Docx)
        .await
        .expect("export fetched");
    assert_eq!(artifact.thread_id, "T1");
    assert_eq!(artifact.format, ExportFormat::Docx);
    assert_eq!(artifact.bytes, payload);
}

#[tokio::test]
async fn test_rejected_export_is_unsupported_format() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/threads/T1/export/xlsx"))
        .respond_with(ResponseTemplate::new(415))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/T2/export/pdf"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    let client = client(&server);

    assert!(matches!(
        client.export_thread("T1", ExportFormat::Xlsx).await,
        Err(ApiError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        client.export_thread("T2", ExportFormat::Pdf).await,
        Err(ApiError::UnsupportedFormat { .. })
    ));
}

#[tokio::test]
async fn test_requests_respect_shared_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/folders/F1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folder": { "id": "F1", "title": "T" },
            "children": []
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_with(
        &server,
        50,
        RateLimiter::new(1, Duration::from_millis(150)),
        fast_retry(0),
    );
    let started = Instant::now();
    for _ in 0..3 {
        client.get_folder("F1").await.unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_mirror_writes_documents_of_successful_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/folders/ROOT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folder": { "id": "ROOT", "title": "Root" },
            "children": [{ "thread_id": "A" }, { "thread_id": "B" }, { "thread_id": "C" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .and(query_param("ids", "A,B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "A": thread_json("A", "Alpha", "document"),
            "B": thread_json("B", "Beta", "document"),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/"))
        .and(query_param("ids", "C"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/A/export/docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"A".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/threads/B/export/docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"B".to_vec()))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let client = client_with(
        &server,
        2,
        RateLimiter::new(100, Duration::from_millis(10)),
        fast_retry(0),
    );
    let config = TraversalConfig {
        root_folder_id: "ROOT".to_string(),
        output_dir: tmp.path().to_path_buf(),
        max_concurrent_folders: 2,
        max_concurrent_documents: 2,
    };

    let report = synchronise(&config, &client, &FsStore).await.unwrap();

    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.artifacts_written(), 6);
    assert_eq!(report.branch_failures.len(), 1);
    assert_eq!(report.branch_failures[0].thread_ids, vec!["C".to_string()]);
    assert!(matches!(
        report.branch_failures[0].kind,
        BranchFailureKind::ThreadBatch(ApiError::Http { status: 500, .. })
    ));
    assert_eq!(std::fs::read(tmp.path().join("Alpha.docx")).unwrap(), b"A");
    assert_eq!(std::fs::read(tmp.path().join("Beta.md")).unwrap(), b"Beta\n");
}
