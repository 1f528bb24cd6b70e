//! Defines routes for image storage and health probes.
//!
//! ## Structure
//! - **Image endpoints**
//!   - `POST   /api/image`          upload (multipart field `image`)
//!   - `GET    /api/image`          list stored images
//!   - `GET    /api/image/id/{id}`  download
//!   - `DELETE /api/image/id/{id}`  delete
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{delete_image, get_image, list_images, upload_image},
    },
    services::blob_service::BlobService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the router for all image routes.
///
/// The router carries shared state (`BlobService`) to all handlers.
pub fn routes() -> Router<BlobService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/image", get(list_images).post(upload_image))
        .route("/api/image/id/{id}", get(get_image).delete(delete_image))
}

/// The complete application: routes, state and HTTP layers.
///
/// `max_upload_bytes` bounds the request body accepted by the upload route.
pub fn app(service: BlobService, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
