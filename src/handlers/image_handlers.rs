//! HTTP handlers for image upload, download, listing and delete.
//! Uploads are streamed from the multipart field straight into the chunker
//! and downloads are streamed chunk by chunk, so neither buffers a whole
//! image in memory.

use crate::{
    errors::{AppError, StorageError},
    models::object::{ObjectId, ObjectMetadata},
    services::{blob_service::BlobService, content},
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::MultipartError,
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::io;
use tracing::debug;

/// Multipart field carrying the uploaded file.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct UploadedImage {
    pub id: ObjectId,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub error: bool,
    pub msg: String,
    pub image: UploadedImage,
}

/// Listing entry for `GET /api/image`.
#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub id: ObjectId,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl From<ObjectMetadata> for ImageSummary {
    fn from(meta: ObjectMetadata) -> Self {
        Self {
            id: meta.id,
            name: meta.original_name,
            extension: meta.extension,
            size: meta.total_size,
            created_at: meta.created_at,
        }
    }
}

/// `POST /api/image`: multipart upload, file in the `image` field.
pub async fn upload_image(
    State(service): State<BlobService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            debug!("ignoring multipart field {:?}", field.name());
            continue;
        }

        let filename = field.file_name().map(str::to_string).unwrap_or_default();
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        let stored = service
            .upload_stream(&filename, stream)
            .await
            .map_err(upload_error)?;

        let body = UploadResponse {
            error: false,
            msg: "Image uploaded successfully".into(),
            image: UploadedImage {
                id: stored.id,
                name: stored.original_name,
                size: stored.total_size,
            },
        };
        return Ok((StatusCode::CREATED, Json(body)));
    }

    Err(AppError::bad_request(
        "there is no uploaded file associated with the given key",
    ))
}

/// A multipart failure inside the field keeps the status axum assigns it,
/// e.g. 413 once the body limit is hit.
fn upload_error(err: StorageError) -> AppError {
    if let StorageError::Payload(io_err) = &err {
        if let Some(multipart_err) = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return AppError::new(multipart_err.status(), multipart_err.body_text());
        }
    }
    err.into()
}

/// `GET /api/image/id/{id}`: stream the stored bytes.
pub async fn get_image(
    State(service): State<BlobService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let download = service.download(&ObjectId::from(id)).await?;

    let mut response = Response::new(Body::from_stream(download.stream));
    *response.status_mut() = StatusCode::OK;
    set_image_headers(response.headers_mut(), &download.metadata);
    Ok(response)
}

/// `DELETE /api/image/id/{id}`
pub async fn delete_image(
    State(service): State<BlobService>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(&ObjectId::from(id)).await?;

    Ok(Json(json!({
        "error": false,
        "msg": "Image deleted successfully",
    })))
}

/// `GET /api/image`: every stored image, in no particular order.
pub async fn list_images(
    State(service): State<BlobService>,
) -> Result<Json<Vec<ImageSummary>>, AppError> {
    let images = service.list().await?;
    Ok(Json(images.into_iter().map(ImageSummary::from).collect()))
}

fn set_image_headers(headers: &mut HeaderMap, meta: &ObjectMetadata) {
    let policy = content::resolve(&meta.extension);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(policy.content_type),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(policy.cache_control),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.total_size));

    let last_modified = meta
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
