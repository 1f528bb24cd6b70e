//! Image storage for the raw material catalogue.
//!
//! Uploaded images are cut into fixed-size chunks held by a [`ChunkStore`]
//! and described by a record in an [`ObjectIndex`]; [`BlobService`] keeps the
//! two consistent and the axum handlers expose it over HTTP.
//!
//! [`ChunkStore`]: services::chunk_store::ChunkStore
//! [`ObjectIndex`]: services::object_index::ObjectIndex
//! [`BlobService`]: services::blob_service::BlobService

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
