//! End-to-end tests against a mock control plane and data plane
//! 模拟控制面与数据面的端到端测试

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use oss_transfer::auth::StaticToken;
use oss_transfer::config::AppConfig;
use oss_transfer::oss::types::{ListOptions, MIN_PART_SIZE};
use oss_transfer::{ErrorKind, OssApi, RetryPolicy};

const TOKEN: &str = "test-token";
const CHUNK: usize = MIN_PART_SIZE as usize;

#[derive(Default)]
struct Mock {
    base: String,
    events: Vec<String>,
    url_queries: Vec<HashMap<String, String>>,
    parts: HashMap<u32, Vec<u8>>,
    content_lengths: Vec<Option<String>>,
    finalize_body: Option<Value>,
    finalize_meta_header: Option<String>,
    /// Parts whose first PUT answers 403 / 首次PUT返回403的分片
    expire_once: Vec<u32>,
    object: Vec<u8>,
    declared_download_size: usize,
    /// Download GETs answered with 403 before serving the object
    expired_downloads: u32,
    /// Answer signed-URL requests with a non-JSON body
    garbled_urls: bool,
    /// Answer part PUTs with 202 instead of 200
    accept_puts_only: bool,
    url_generation: u32,
}

type Shared = Arc<Mutex<Mock>>;

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", TOKEN);
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

async fn signed_upload_urls(
    State(mock): State<Shared>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut mock = mock.lock().unwrap();
    let first: u32 = query["firstPart"].parse().unwrap();
    let parts: u32 = query["parts"].parse().unwrap();
    mock.events.push(format!("urls {}/{} {}+{}", bucket, object, first, parts));
    mock.url_queries.push(query.clone());
    if mock.garbled_urls {
        return (StatusCode::OK, "not json").into_response();
    }

    let generation = mock.url_generation;
    mock.url_generation += 1;
    let urls: Vec<String> = (first..first + parts)
        .map(|p| format!("{}/s3/part/{}?sig={}", mock.base, p, generation))
        .collect();
    let upload_key = query.get("uploadKey").cloned().unwrap_or_else(|| "upload-key-1".to_string());
    Json(json!({ "uploadKey": upload_key, "urls": urls })).into_response()
}

async fn complete_upload(
    State(mock): State<Shared>,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut mock = mock.lock().unwrap();
    mock.events.push("finalize".to_string());
    mock.finalize_meta_header = headers
        .get("x-ads-meta-content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    mock.finalize_body = Some(body.clone());

    let received: usize = mock.parts.values().map(Vec::len).sum();
    if body["size"].as_u64() != Some(received as u64) {
        return (StatusCode::BAD_REQUEST, "size does not match uploaded data").into_response();
    }
    Json(json!({
        "bucketKey": bucket,
        "objectId": format!("urn:adsk.objects:os.object:{}/{}", bucket, object),
        "objectKey": object,
        "size": received,
        "contentType": "application/octet-stream",
        "location": format!("{}/oss/v2/buckets/{}/objects/{}", mock.base, bucket, object),
    }))
    .into_response()
}

async fn put_part(
    State(mock): State<Shared>,
    Path(part): Path<u32>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut mock = mock.lock().unwrap();
    if let Some(pos) = mock.expire_once.iter().position(|p| *p == part) {
        mock.expire_once.remove(pos);
        mock.events.push(format!("put {} expired", part));
        return (StatusCode::FORBIDDEN, "Request has expired").into_response();
    }
    if mock.accept_puts_only {
        mock.events.push(format!("put {} accepted", part));
        return StatusCode::ACCEPTED.into_response();
    }
    mock.events.push(format!("put {}", part));
    mock.content_lengths.push(
        headers.get("content-length").and_then(|v| v.to_str().ok()).map(str::to_string),
    );
    mock.parts.insert(part, body.to_vec());
    StatusCode::OK.into_response()
}

async fn list_objects(
    State(mock): State<Shared>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut mock = mock.lock().unwrap();
    let mut keys: Vec<_> = query.keys().cloned().collect();
    keys.sort();
    mock.events.push(format!("list {} {}", bucket, keys.join(",")));
    Json(json!({
        "items": [
            { "bucketKey": bucket, "objectKey": "a.bin", "objectId": "urn:a", "size": 3 },
            { "bucketKey": bucket, "objectKey": "b.bin", "objectId": "urn:b", "size": 5 }
        ],
        "next": format!("{}/oss/v2/buckets/{}/objects?startAt=b.bin", mock.base, bucket)
    }))
    .into_response()
}

async fn signed_download(State(mock): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut mock = mock.lock().unwrap();
    mock.events.push("signed download".to_string());
    Json(json!({
        "status": "complete",
        "url": format!("{}/s3/object", mock.base),
        "params": { "content-type": "application/octet-stream" },
        "size": mock.declared_download_size,
        "sha1": "",
    }))
    .into_response()
}

async fn get_object(State(mock): State<Shared>) -> Response {
    let mut mock = mock.lock().unwrap();
    if mock.expired_downloads > 0 {
        mock.expired_downloads -= 1;
        mock.events.push("get expired".to_string());
        return (StatusCode::FORBIDDEN, "Request has expired").into_response();
    }
    mock.events.push("get".to_string());
    mock.object.clone().into_response()
}

async fn start(mock: Mock) -> (Shared, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shared = Arc::new(Mutex::new(Mock { base: base.clone(), ..mock }));

    let app = Router::new()
        .route(
            "/oss/v2/buckets/:bucket/objects/:object/signeds3upload",
            get(signed_upload_urls).post(complete_upload),
        )
        .route("/oss/v2/buckets/:bucket/objects/:object/signeds3download", get(signed_download))
        .route("/oss/v2/buckets/:bucket/objects", get(list_objects))
        .route("/s3/part/:part", put(put_part))
        .route("/s3/object", get(get_object))
        .layer(DefaultBodyLimit::disable())
        .with_state(shared.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (shared, base)
}

fn api(base: &str, max_parts: u32) -> OssApi {
    let mut config = AppConfig::default();
    config.api.host = base.to_string();
    config.upload.chunk_size = MIN_PART_SIZE;
    config.upload.max_parts_per_batch = max_parts;
    config.upload.retry = RetryPolicy::new(3, Duration::from_millis(5));
    OssApi::with_authenticator(&config, Arc::new(StaticToken(TOKEN.to_string()))).unwrap()
}

fn sample_file(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    (file, data)
}

#[tokio::test]
async fn test_upload_three_parts_single_batch() {
    let (mock, base) = start(Mock::default()).await;
    let (file, data) = sample_file(2 * CHUNK + 321);

    let result = api(&base, 25)
        .upload_object("bucket", "model.bin", file.path())
        .await
        .unwrap();

    assert_eq!(result.size, data.len() as u64);
    assert_eq!(result.object_key, "model.bin");

    let mock = mock.lock().unwrap();
    assert_eq!(
        mock.events,
        vec!["urls bucket/model.bin 1+3", "put 1", "put 2", "put 3", "finalize"]
    );

    // 第一次请求不带 uploadKey / first request carries no uploadKey
    let query = &mock.url_queries[0];
    assert!(!query.contains_key("uploadKey"));
    assert_eq!(query["minutesExpiration"], "60");

    let lengths: Vec<_> = mock.content_lengths.iter().map(|l| l.clone().unwrap()).collect();
    assert_eq!(lengths, vec![CHUNK.to_string(), CHUNK.to_string(), "321".to_string()]);

    let mut assembled = Vec::new();
    for part in 1..=3 {
        assembled.extend_from_slice(&mock.parts[&part]);
    }
    assert_eq!(assembled, data);

    assert_eq!(
        mock.finalize_body,
        Some(json!({ "uploadKey": "upload-key-1", "size": data.len() }))
    );
    assert_eq!(mock.finalize_meta_header.as_deref(), Some("application/octet-stream"));
}

#[tokio::test]
async fn test_upload_two_batches_reuses_upload_key() {
    let (mock, base) = start(Mock::default()).await;
    let (file, data) = sample_file(2 * CHUNK + 10);

    api(&base, 2).upload_object("bucket", "two.bin", file.path()).await.unwrap();

    let mock = mock.lock().unwrap();
    assert_eq!(
        mock.events,
        vec!["urls bucket/two.bin 1+2", "put 1", "put 2", "urls bucket/two.bin 3+1", "put 3", "finalize"]
    );
    assert_eq!(mock.url_queries[1]["uploadKey"], "upload-key-1");
    assert_eq!(mock.finalize_body.as_ref().unwrap()["size"], json!(data.len()));
}

#[tokio::test]
async fn test_expired_url_is_refreshed() {
    let (mock, base) = start(Mock { expire_once: vec![2], ..Default::default() }).await;
    let (file, _) = sample_file(2 * CHUNK + 1);

    api(&base, 25).upload_object("bucket", "exp.bin", file.path()).await.unwrap();

    let mock = mock.lock().unwrap();
    assert_eq!(
        mock.events,
        vec![
            "urls bucket/exp.bin 1+3",
            "put 1",
            "put 2 expired",
            "urls bucket/exp.bin 2+2",
            "put 2",
            "put 3",
            "finalize",
        ]
    );
    assert_eq!(mock.url_queries[1]["uploadKey"], "upload-key-1");
}

#[tokio::test]
async fn test_rejected_credentials_fail_url_request() {
    let (mock, base) = start(Mock::default()).await;
    let (file, _) = sample_file(10);

    let mut config = AppConfig::default();
    config.api.host = base;
    config.upload.retry = RetryPolicy::new(2, Duration::from_millis(5));
    let api = OssApi::with_authenticator(&config, Arc::new(StaticToken("wrong".to_string()))).unwrap();

    let err = api.upload_object("bucket", "x.bin", file.path()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err.to_string().starts_with("signed URLs for parts 1-1"));
    assert!(mock.lock().unwrap().events.is_empty());
}

#[tokio::test]
async fn test_list_objects_omits_empty_params() {
    let (mock, base) = start(Mock::default()).await;

    let options = ListOptions {
        limit: Some(2),
        begins_with: None,
        start_at: Some(String::new()),
    };
    let content = api(&base, 25).list_objects("bucket", &options).await.unwrap();

    assert_eq!(content.items.len(), 2);
    assert_eq!(content.items[1].object_key, "b.bin");
    assert!(content.next.unwrap().ends_with("startAt=b.bin"));
    assert_eq!(mock.lock().unwrap().events, vec!["list bucket limit"]);
}

#[tokio::test]
async fn test_download_checks_size() {
    let object = b"hello object storage".to_vec();
    let (_, base) = start(Mock {
        object: object.clone(),
        declared_download_size: object.len(),
        ..Default::default()
    })
    .await;

    let data = api(&base, 25).download_object("bucket", "hello.txt").await.unwrap();
    assert_eq!(data.as_ref(), object.as_slice());

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("hello.txt");
    let written = api(&base, 25).download_object_to("bucket", "hello.txt", &dest).await.unwrap();
    assert_eq!(written, object.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), object);
}

#[tokio::test]
async fn test_download_size_mismatch() {
    let (_, base) = start(Mock {
        object: b"short".to_vec(),
        declared_download_size: 100,
        ..Default::default()
    })
    .await;

    let err = api(&base, 25).download_object("bucket", "short.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SizeMismatch);
}

#[tokio::test]
async fn test_garbled_url_response_is_not_retried() {
    let (mock, base) = start(Mock { garbled_urls: true, ..Default::default() }).await;
    let (file, _) = sample_file(10);

    let err = api(&base, 25).upload_object("bucket", "bad.bin", file.path()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert!(err.to_string().starts_with("signed URLs for parts 1-1"));
    assert!(err.to_string().contains("not json"));
    assert_eq!(mock.lock().unwrap().events, vec!["urls bucket/bad.bin 1+1"]);
}

#[tokio::test]
async fn test_expired_download_url_is_refreshed_once() {
    let object = b"fresh url please".to_vec();
    let (mock, base) = start(Mock {
        object: object.clone(),
        declared_download_size: object.len(),
        expired_downloads: 1,
        ..Default::default()
    })
    .await;

    let data = api(&base, 25).download_object("bucket", "fresh.txt").await.unwrap();
    assert_eq!(data.as_ref(), object.as_slice());
    assert_eq!(
        mock.lock().unwrap().events,
        vec!["signed download", "get expired", "signed download", "get"]
    );
}

#[tokio::test]
async fn test_download_url_expired_twice_fails() {
    let (mock, base) = start(Mock {
        object: b"never".to_vec(),
        declared_download_size: 5,
        expired_downloads: 2,
        ..Default::default()
    })
    .await;

    let err = api(&base, 25).download_object("bucket", "gone.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UrlExpired);
    assert_eq!(mock.lock().unwrap().events.len(), 4);
}

#[tokio::test]
async fn test_part_put_requires_200() {
    let (mock, base) = start(Mock { accept_puts_only: true, ..Default::default() }).await;
    let (file, _) = sample_file(10);

    let err = api(&base, 25).upload_object("bucket", "202.bin", file.path()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(err.to_string().contains("[202]"));
    let mock = mock.lock().unwrap();
    assert_eq!(
        mock.events,
        vec!["urls bucket/202.bin 1+1", "put 1 accepted", "put 1 accepted", "put 1 accepted"]
    );
    assert!(mock.finalize_body.is_none());
}
