use std::sync::Arc;

use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use hyper::Body;
use serde_json::{json, Value};
use tower::ServiceExt;

use imagery_core::memory::MemoryMetadata;
use imagery_core::{ContentHash, DefaultKeyStrategy, StaticOwnerResolver, UploadSettings, Uploads};
use imagery_objectstore::Memory;

use super::Imagery;

const BOUNDARY: &str = "imagery-test-boundary";
const CONTENT: &[u8] = b"0123456789abcdef0123";

fn app() -> Router {
    let metadata = MemoryMetadata::new();
    let settings = UploadSettings {
        flush_threshold: 8,
        max_chunk_size: 1024,
        tus_max_size: 1024,
        public_base_url: String::from("https://cdn.example.com/"),
    };
    let uploads = Uploads::new(
        Arc::new(metadata.clone()),
        Arc::new(metadata),
        Arc::new(Memory::new(8)),
        Arc::new(DefaultKeyStrategy::default()),
        settings,
    )
    .unwrap();
    Imagery::new(uploads, Arc::new(StaticOwnerResolver::new(["users"])))
        .router()
        .unwrap()
}

fn hash(bytes: &[u8]) -> String {
    ContentHash::compute(bytes).as_str().to_string()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn part_request(uri: &str, part_index: i64, chunk: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"partIndex\"\r\n\r\n{part_index}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"chunk\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(chunk);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn tus_request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("tus-resumable", "1.0.0")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, header::HeaderMap, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = match body.is_empty() {
        true => Value::Null,
        false => serde_json::from_slice(&body).unwrap(),
    };
    (status, headers, value)
}

async fn initiate(app: &Router, content: &[u8]) -> String {
    let (status, headers, body) = send(
        app,
        json_request(
            Method::POST,
            "/users/1/uploads",
            json!({"contentType": "image/png", "contentHash": hash(content)}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["uploadId"].as_str().unwrap().to_string();
    assert_eq!(
        headers[header::LOCATION].to_str().unwrap(),
        format!("/users/1/uploads/{id}")
    );
    id
}

async fn tus_create(app: &Router, content: &[u8]) -> String {
    let (status, headers, _) = send(
        app,
        tus_request(Method::POST, "/users/1/uploads/tus")
            .header("upload-length", content.len().to_string())
            .header(
                "upload-metadata",
                format!("filetype aW1hZ2UvcG5n,contentHash {}", b64(&hash(content))),
            )
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    headers[header::LOCATION].to_str().unwrap().to_string()
}

fn b64(s: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(s)
}

#[tokio::test]
async fn part_protocol_uploads_and_links_image() {
    let app = app();
    let id = initiate(&app, CONTENT).await;

    let parts_uri = format!("/users/1/uploads/{id}/parts");
    let (status, _, body) = send(&app, part_request(&parts_uri, 0, &CONTENT[..12])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["currentPartIndex"], 1);
    assert_eq!(body["bufferedBytes"], 0);

    let (status, _, _) = send(&app, part_request(&parts_uri, 1, &CONTENT[12..])).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri(format!("/users/1/uploads/{id}/complete"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["imageUrl"],
        format!("https://cdn.example.com/images/users/1/{id}.png")
    );
    assert_eq!(body["isPrimary"], true);
    assert_eq!(body["totalParts"], 2);

    let (status, _, body) = send(
        &app,
        Request::builder()
            .uri(format!("/users/1/uploads/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn unknown_resource_kind_is_not_found() {
    let app = app();
    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/galleries/1/uploads",
            json!({"contentType": "image/png", "contentHash": hash(CONTENT)}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn invalid_initiate_body_is_bad_request() {
    let app = app();
    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/users/1/uploads",
            json!({"contentType": "application/pdf", "contentHash": hash(CONTENT)}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_argument");
}

#[tokio::test]
async fn out_of_order_part_is_bad_request() {
    let app = app();
    let id = initiate(&app, CONTENT).await;
    let (status, _, _) = send(
        &app,
        part_request(&format!("/users/1/uploads/{id}/parts"), 1, CONTENT),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hash_mismatch_reports_both_digests() {
    let app = app();
    let id = initiate(&app, CONTENT).await;
    send(
        &app,
        part_request(&format!("/users/1/uploads/{id}/parts"), 0, b"not the declared bytes"),
    )
    .await;

    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            &format!("/users/1/uploads/{id}/complete"),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "integrity_error");
    assert_eq!(body["error"]["declared"], hash(CONTENT));
    assert_eq!(body["error"]["computed"], hash(b"not the declared bytes"));
}

#[tokio::test]
async fn unparseable_upload_id_is_not_found() {
    let app = app();
    let (status, _, _) = send(
        &app,
        Request::builder()
            .uri("/users/1/uploads/not-a-uuid")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tus_options_advertises_capabilities() {
    let app = app();
    let (status, headers, _) = send(
        &app,
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/users/1/uploads/tus")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(headers["tus-version"], "1.0.0");
    assert_eq!(headers["tus-extension"], "creation");
    assert_eq!(headers["tus-max-size"], "1024");
    assert_eq!(headers["tus-resumable"], "1.0.0");
}

#[tokio::test]
async fn tus_requires_resumable_header() {
    let app = app();
    let (status, headers, _) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/users/1/uploads/tus")
            .header("upload-length", "20")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(headers["tus-version"], "1.0.0");
}

#[tokio::test]
async fn tus_rejects_oversized_upload() {
    let app = app();
    let (status, _, _) = send(
        &app,
        tus_request(Method::POST, "/users/1/uploads/tus")
            .header("upload-length", "1025")
            .header("upload-metadata", "filetype aW1hZ2UvcG5n")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn tus_upload_in_two_patches() {
    let app = app();
    let location = tus_create(&app, CONTENT).await;
    assert!(location.starts_with("/users/1/uploads/tus/"));

    let (status, headers, _) = send(
        &app,
        tus_request(Method::HEAD, &location).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["upload-offset"], "0");
    assert_eq!(headers["upload-length"], "20");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");

    let (status, headers, _) = send(
        &app,
        tus_request(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, "application/offset+octet-stream")
            .header("upload-offset", "0")
            .body(Body::from(&CONTENT[..10]))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(headers["upload-offset"], "10");
    assert!(headers.get("image-id").is_none());

    let (status, headers, _) = send(
        &app,
        tus_request(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, "application/offset+octet-stream")
            .header("upload-offset", "10")
            .body(Body::from(&CONTENT[10..]))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(headers["upload-offset"], "20");
    assert!(headers.get("image-id").is_some());
    let id = location.rsplit('/').next().unwrap();
    assert_eq!(
        headers["image-url"],
        format!("https://cdn.example.com/images/users/1/{id}.png").as_str()
    );
}

#[tokio::test]
async fn tus_patch_checks_media_type_and_offset() {
    let app = app();
    let location = tus_create(&app, CONTENT).await;

    let (status, _, _) = send(
        &app,
        tus_request(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("upload-offset", "0")
            .body(Body::from(CONTENT))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, _, body) = send(
        &app,
        tus_request(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, "application/offset+octet-stream")
            .header("upload-offset", "5")
            .body(Body::from(CONTENT))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "conflict");
}

struct ReadOnly;

#[async_trait::async_trait]
impl imagery_core::UploadGate for ReadOnly {
    async fn authorize(
        &self,
        _owner: &imagery_core::OwnerRef,
        action: imagery_core::UploadAction,
        credentials: Option<&str>,
    ) -> imagery_core::Result<()> {
        match (action, credentials) {
            (imagery_core::UploadAction::Status, _) | (_, Some("Bearer writer")) => Ok(()),
            _ => Err(imagery_core::Error::Unauthorized(String::from("read only"))),
        }
    }
}

#[tokio::test]
async fn gate_denials_are_forbidden() {
    let metadata = MemoryMetadata::new();
    let uploads = Uploads::new(
        Arc::new(metadata.clone()),
        Arc::new(metadata),
        Arc::new(Memory::new(0)),
        Arc::new(DefaultKeyStrategy::default()),
        UploadSettings::default(),
    )
    .unwrap();
    let app = Imagery::new(uploads, Arc::new(StaticOwnerResolver::new(["users"])))
        .with_gate(Arc::new(ReadOnly))
        .router()
        .unwrap();

    let body = json!({"contentType": "image/png", "contentHash": hash(CONTENT)});
    let (status, _, error) = send(
        &app,
        json_request(Method::POST, "/users/1/uploads", body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["error"]["kind"], "unauthorized");

    let mut req = json_request(Method::POST, "/users/1/uploads", body);
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer writer".parse().unwrap());
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
}
