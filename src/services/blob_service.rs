//! src/services/blob_service.rs
//!
//! BlobService: upload, download and delete of whole images on top of a
//! [`ChunkStore`] and an [`ObjectIndex`].
//!
//! Ordering rules:
//! - upload writes every chunk before the index record, so an indexed object
//!   always has durable bytes behind it;
//! - delete removes chunks before the index record, so an interrupted delete
//!   leaves a record that reports `ChunkMissing` rather than unreachable
//!   chunks.
//!
//! The service keeps no mutable state of its own; clones share the stores.

use crate::{
    errors::{StorageError, StorageResult},
    models::object::{ObjectId, ObjectMetadata},
    services::{
        chunk_store::{ByteStream, ChunkStore},
        content,
        object_index::ObjectIndex,
    },
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt, future, pin_mut, stream};
use std::{io, sync::Arc};
use tracing::{Span, error, field, info, instrument, warn};

/// 255 KiB, the segment size the previous storage driver used.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// A readable object: its index record plus a stream of its bytes.
pub struct Download {
    pub metadata: ObjectMetadata,
    pub stream: ByteStream,
}

#[derive(Clone)]
pub struct BlobService {
    chunks: Arc<dyn ChunkStore>,
    index: Arc<dyn ObjectIndex>,
    chunk_size: usize,
}

impl BlobService {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        index: Arc<dyn ObjectIndex>,
        chunk_size: usize,
    ) -> Self {
        Self {
            chunks,
            index,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    pub fn index(&self) -> &Arc<dyn ObjectIndex> {
        &self.index
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Store an in-memory payload.
    pub async fn upload(
        &self,
        original_name: &str,
        bytes: Bytes,
    ) -> StorageResult<ObjectMetadata> {
        self.upload_stream(original_name, stream::once(future::ready(Ok(bytes))))
            .await
    }

    /// Store a payload as it arrives.
    ///
    /// The input is re-cut into `chunk_size` pieces regardless of how it is
    /// framed, so the same bytes always produce the same chunk layout. If any
    /// step fails, chunks already written for the new id are removed on a
    /// best-effort basis and nothing is indexed.
    #[instrument(skip(self, stream), fields(object_id = field::Empty))]
    pub async fn upload_stream<S>(
        &self,
        original_name: &str,
        stream: S,
    ) -> StorageResult<ObjectMetadata>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let extension = content::accepted_extension(original_name)
            .ok_or_else(|| StorageError::UnsupportedType(original_name.to_string()))?;

        let id = ObjectId::generate();
        Span::current().record("object_id", id.as_str());

        let mut chunk_refs = Vec::new();
        let total_size = match self.write_chunks(&id, stream, &mut chunk_refs).await {
            Ok(total_size) => total_size,
            Err(err) => {
                self.discard_chunks(&id, &chunk_refs).await;
                return Err(err);
            }
        };

        let metadata = ObjectMetadata {
            id: id.clone(),
            original_name: original_name.to_string(),
            extension,
            total_size,
            chunk_refs,
            created_at: Utc::now(),
        };

        if let Err(err) = self.index.put(&metadata).await {
            self.discard_chunks(&id, &metadata.chunk_refs).await;
            return Err(err);
        }

        info!(
            size = metadata.total_size,
            chunks = metadata.chunk_refs.len(),
            "object stored"
        );
        Ok(metadata)
    }

    /// Resolve `id` and open its bytes for reading.
    #[instrument(skip(self), fields(object_id = %id))]
    pub async fn download(&self, id: &ObjectId) -> StorageResult<Download> {
        let metadata = self.index.get(id).await?;
        let stream = self
            .chunks
            .get_ordered(&metadata.chunk_refs)
            .await
            .inspect_err(|err| {
                if let StorageError::ChunkMissing(key) = err {
                    error!(object_id = %id, chunk_key = %key, "index references a missing chunk");
                }
            })?;

        Ok(Download { metadata, stream })
    }

    /// Remove an object's chunks, then its index record.
    #[instrument(skip(self), fields(object_id = %id))]
    pub async fn delete(&self, id: &ObjectId) -> StorageResult<ObjectMetadata> {
        let metadata = self.index.get(id).await?;
        self.chunks.delete_all(&metadata.chunk_refs).await?;
        self.index.delete(id).await?;

        info!(chunks = metadata.chunk_refs.len(), "object deleted");
        Ok(metadata)
    }

    pub async fn list(&self) -> StorageResult<Vec<ObjectMetadata>> {
        self.index.list().await
    }

    async fn write_chunks<S>(
        &self,
        id: &ObjectId,
        stream: S,
        chunk_refs: &mut Vec<String>,
    ) -> StorageResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        pin_mut!(stream);
        let mut pending = BytesMut::new();
        let mut total_size: u64 = 0;

        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(StorageError::Payload)?;
            total_size += frame.len() as u64;
            pending.extend_from_slice(&frame);

            while pending.len() >= self.chunk_size {
                let chunk = pending.split_to(self.chunk_size).freeze();
                self.put_chunk(id, chunk, chunk_refs).await?;
            }
        }
        if !pending.is_empty() {
            self.put_chunk(id, pending.freeze(), chunk_refs).await?;
        }

        Ok(total_size)
    }

    /// The key is recorded before the write so a failed put is still
    /// covered by cleanup.
    async fn put_chunk(
        &self,
        id: &ObjectId,
        chunk: Bytes,
        chunk_refs: &mut Vec<String>,
    ) -> StorageResult<()> {
        let key = id.chunk_key(chunk_refs.len());
        chunk_refs.push(key.clone());
        self.chunks.put(&key, chunk).await
    }

    async fn discard_chunks(&self, id: &ObjectId, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.chunks.delete_all(keys).await {
            warn!(
                object_id = %id,
                error = %err,
                "failed to clean up chunks of aborted upload"
            );
        }
    }
}
