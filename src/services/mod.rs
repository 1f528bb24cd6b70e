//! Storage core: chunk store, object index, the blob service that
//! coordinates them, and content resolution for serving.

pub mod blob_service;
pub mod chunk_store;
pub mod content;
pub mod object_index;
