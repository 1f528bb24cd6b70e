use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use rmc_blob_store::{
    models::object::ObjectId,
    routes::routes::app,
    services::{
        blob_service::BlobService, chunk_store::DiskChunkStore, object_index::SqliteObjectIndex,
    },
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "rmc-test-boundary";

async fn test_service(chunk_size: usize) -> (BlobService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let chunks = Arc::new(DiskChunkStore::new(dir.path().join("chunks")));
    let index = Arc::new(SqliteObjectIndex::in_memory().await.unwrap());
    (BlobService::new(chunks, index, chunk_size), dir)
}

async fn test_app(chunk_size: usize) -> (Router, TempDir) {
    let (service, dir) = test_service(chunk_size).await;
    (app(service, 1024 * 1024), dir)
}

fn multipart_upload(field: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(res: Response) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn json_body(res: Response) -> Value {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

#[tokio::test]
async fn upload_download_delete_ten_byte_png() {
    let (app, _dir) = test_app(4).await;
    let payload: Vec<u8> = (0u8..10).collect();

    let res = app
        .clone()
        .oneshot(multipart_upload("image", "a.png", &payload))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = json_body(res).await;
    assert_eq!(body["error"], false);
    assert_eq!(body["image"]["name"], "a.png");
    assert_eq!(body["image"]["size"], 10);
    let id = body["image"]["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(request("GET", &format!("/api/image/id/{id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        res.headers()[header::CACHE_CONTROL],
        "public, max-age=31536000"
    );
    assert_eq!(res.headers()[header::CONTENT_LENGTH], "10");
    assert!(res.headers().contains_key(header::LAST_MODIFIED));
    assert_eq!(body_bytes(res).await, payload);

    let res = app
        .clone()
        .oneshot(request("DELETE", &format!("/api/image/id/{id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["error"], false);
    assert_eq!(body["msg"], "Image deleted successfully");

    let res = app
        .oneshot(request("GET", &format!("/api/image/id/{id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(res).await["error"], true);
}

#[tokio::test]
async fn jpeg_upload_resolves_to_image_jpeg() {
    let (app, _dir) = test_app(3).await;

    let res = app
        .clone()
        .oneshot(multipart_upload("image", "Scan.JPEG", b"\xff\xd8\xff\xe0 jpeg"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = json_body(res).await["image"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let res = app
        .oneshot(request("GET", &format!("/api/image/id/{id}")))
        .await
        .unwrap();
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(body_bytes(res).await, b"\xff\xd8\xff\xe0 jpeg");
}

#[tokio::test]
async fn unsupported_file_type_is_bad_request_and_stores_nothing() {
    let (app, _dir) = test_app(4).await;

    let res = app
        .clone()
        .oneshot(multipart_upload("image", "notes.txt", b"hello"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["error"], true);
    assert_eq!(body["msg"], "Invalid file type");

    let res = app.oneshot(request("GET", "/api/image")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await, Value::Array(Vec::new()));
}

#[tokio::test]
async fn upload_without_image_field_is_bad_request() {
    let (app, _dir) = test_app(4).await;

    let res = app
        .oneshot(multipart_upload("avatar", "a.png", b"png"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(res).await["error"], true);
}

#[tokio::test]
async fn unknown_id_is_not_found_for_download_and_delete() {
    let (app, _dir) = test_app(4).await;

    for method in ["GET", "DELETE"] {
        let res = app
            .clone()
            .oneshot(request(method, "/api/image/id/never-issued"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{method}");
        let body = json_body(res).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["msg"], "Image not found");
    }
}

#[tokio::test]
async fn missing_chunk_is_internal_error() {
    let (service, _dir) = test_service(4).await;
    let app = app(service.clone(), 1024 * 1024);

    let res = app
        .clone()
        .oneshot(multipart_upload("image", "a.png", b"0123456789"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = json_body(res).await["image"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let stored = service.index().get(&ObjectId::from(id.as_str())).await.unwrap();
    service
        .chunk_store()
        .delete_all(&stored.chunk_refs[1..2])
        .await
        .unwrap();

    let res = app
        .oneshot(request("GET", &format!("/api/image/id/{id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(res).await;
    assert_eq!(body["error"], true);
    assert!(body["msg"].is_string());
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let (service, _dir) = test_service(64).await;
    let app = app(service.clone(), 256);

    let res = app
        .oneshot(multipart_upload("image", "big.png", &[7u8; 4096]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(res).await["error"], true);
    assert!(service.list().await.unwrap().is_empty());
    assert!(service.chunk_store().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_reports_uploaded_images() {
    let (app, _dir) = test_app(4).await;

    for name in ["one.png", "two.jpg"] {
        let res = app
            .clone()
            .oneshot(multipart_upload("image", name, b"0123456789"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = app.oneshot(request("GET", "/api/image")).await.unwrap();
    let listed = json_body(res).await;
    let mut names: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|image| image["name"].as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, ["one.png", "two.jpg"]);
    for image in listed.as_array().unwrap() {
        assert_eq!(image["size"], 10);
    }
}

#[tokio::test]
async fn health_probes_report_ok() {
    let (app, _dir) = test_app(4).await;

    let res = app.clone().oneshot(request("GET", "/healthz")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "ok");

    let res = app.oneshot(request("GET", "/readyz")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["checks"]["index"]["ok"], true);
    assert_eq!(body["checks"]["chunks"]["ok"], true);
}
