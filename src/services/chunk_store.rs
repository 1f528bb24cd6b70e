//! src/services/chunk_store.rs
//!
//! Chunk store: durable key → bytes mapping for fixed-size object segments.
//! The disk implementation shards chunk files beneath
//! `base_path/{shard}/{shard}/{key}` and never rewrites a chunk once placed.

use crate::errors::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, future, stream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Bytes of one object, chunk after chunk, in reassembly order.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

const MAX_CHUNK_KEY_LEN: usize = 255;
const TMP_PREFIX: &str = ".tmp-";
const PROBE_PREFIX: &str = ".probe-";

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Durably store `bytes` under `key`.
    async fn put(&self, key: &str, bytes: Bytes) -> StorageResult<()>;

    /// Stream the listed chunks back to back.
    ///
    /// Every key is checked up front; an absent one fails the whole call with
    /// `ChunkMissing` before any byte is produced.
    async fn get_ordered(&self, keys: &[String]) -> StorageResult<ByteStream>;

    /// Remove every listed chunk. Absent keys are not an error.
    async fn delete_all(&self, keys: &[String]) -> StorageResult<()>;

    async fn contains(&self, key: &str) -> StorageResult<bool>;

    /// Every chunk key currently stored.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Verify the backing medium accepts writes and reads.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Chunk store backed by plain files on local disk.
///
/// Shard directories are created on demand and never removed, so a put
/// cannot lose its parent directory to a concurrent delete.
#[derive(Clone, Debug)]
pub struct DiskChunkStore {
    base_path: PathBuf,
}

impl DiskChunkStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Two-level shard directories for a chunk key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase hex, which
    /// keeps the file count per directory small.
    fn chunk_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Full path of a chunk file. Parent directories may not exist yet.
    fn chunk_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::chunk_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }
}

/// Reject keys that could escape the shard directory.
fn ensure_key_safe(key: &str) -> io::Result<()> {
    let unsafe_key = key.is_empty()
        || key.len() > MAX_CHUNK_KEY_LEN
        || key.starts_with('.')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\');
    if unsafe_key {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("invalid chunk key `{}`", key),
        ));
    }
    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl ChunkStore for DiskChunkStore {
    async fn put(&self, key: &str, bytes: Bytes) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let chunk_path = self.chunk_path(key);
        let parent = chunk_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "chunk path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, &bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp_path, &chunk_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(chunk_key = key, len = bytes.len(), "stored chunk");
        Ok(())
    }

    async fn get_ordered(&self, keys: &[String]) -> StorageResult<ByteStream> {
        let mut paths = Vec::with_capacity(keys.len());
        for key in keys {
            if ensure_key_safe(key).is_err() {
                return Err(StorageError::ChunkMissing(key.clone()));
            }
            let path = self.chunk_path(key);
            if !fs::try_exists(&path).await? {
                return Err(StorageError::ChunkMissing(key.clone()));
            }
            paths.push(path);
        }

        // Files are opened one at a time as the consumer reaches them.
        let stream = stream::iter(paths)
            .then(|path| async move { File::open(path).await })
            .flat_map(|opened| match opened {
                Ok(file) => ReaderStream::new(file).left_stream(),
                Err(err) => {
                    stream::once(future::ready(Err::<Bytes, io::Error>(err))).right_stream()
                }
            });

        Ok(Box::pin(stream))
    }

    async fn delete_all(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            if ensure_key_safe(key).is_err() {
                debug!(chunk_key = %key, "skipping delete of malformed chunk key");
                continue;
            }
            let chunk_path = self.chunk_path(key);
            match fs::remove_file(&chunk_path).await {
                Ok(_) => debug!("removed chunk file {}", chunk_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("chunk file {} already missing", chunk_path.display());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        if ensure_key_safe(key).is_err() {
            return Ok(false);
        }
        Ok(fs::try_exists(self.chunk_path(key)).await?)
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut level_a = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };

        while let Some(shard_a) = level_a.next_entry().await? {
            if !shard_a.file_type().await?.is_dir() {
                continue;
            }
            let mut level_b = fs::read_dir(shard_a.path()).await?;
            while let Some(shard_b) = level_b.next_entry().await? {
                if !shard_b.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = fs::read_dir(shard_b.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with(TMP_PREFIX) {
                        continue;
                    }
                    keys.push(name);
                }
            }
        }

        Ok(keys)
    }

    async fn health_check(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe_path = self
            .base_path
            .join(format!("{}{}", PROBE_PREFIX, Uuid::new_v4()));

        if let Err(err) = fs::write(&probe_path, b"readyz").await {
            let _ = fs::remove_file(&probe_path).await;
            return Err(err.into());
        }
        let read_back = fs::read(&probe_path).await;
        let _ = fs::remove_file(&probe_path).await;

        if read_back? != b"readyz" {
            return Err(
                io::Error::new(ErrorKind::InvalidData, "probe file content mismatch").into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::sync::Arc;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
        parts.concat()
    }

    #[tokio::test]
    async fn put_then_get_ordered_concatenates_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::new(dir.path());

        store.put("obj-000000", Bytes::from_static(b"hello ")).await.unwrap();
        store.put("obj-000001", Bytes::from_static(b"world")).await.unwrap();

        let keys = vec!["obj-000000".to_string(), "obj-000001".to_string()];
        let bytes = collect(store.get_ordered(&keys).await.unwrap()).await;
        assert_eq!(bytes, b"hello world");

        let reversed = vec!["obj-000001".to_string(), "obj-000000".to_string()];
        let bytes = collect(store.get_ordered(&reversed).await.unwrap()).await;
        assert_eq!(bytes, b"worldhello ");
    }

    #[tokio::test]
    async fn get_ordered_reports_first_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::new(dir.path());
        store.put("obj-000000", Bytes::from_static(b"a")).await.unwrap();

        let keys = vec!["obj-000000".to_string(), "obj-000001".to_string()];
        match store.get_ordered(&keys).await {
            Err(StorageError::ChunkMissing(key)) => assert_eq!(key, "obj-000001"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected ChunkMissing"),
        }
    }

    #[tokio::test]
    async fn delete_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::new(dir.path());
        let keys = vec!["x-000000".to_string(), "x-000001".to_string()];
        for key in &keys {
            store.put(key, Bytes::from_static(b"data")).await.unwrap();
        }
        assert_eq!(store.keys().await.unwrap().len(), 2);

        store.delete_all(&keys).await.unwrap();
        store.delete_all(&keys).await.unwrap();

        assert!(store.keys().await.unwrap().is_empty());
        assert!(!store.contains("x-000000").await.unwrap());
    }

    /// Finds a key `{prefix}{n}-000000` that lands in the same shard
    /// directory as `key`.
    fn key_sharing_shard_with(key: &str, prefix: &str) -> String {
        let target = DiskChunkStore::chunk_shards(key);
        (0u32..)
            .map(|n| format!("{prefix}{n}-000000"))
            .find(|candidate| DiskChunkStore::chunk_shards(candidate) == target)
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_does_not_break_put_into_shared_shard() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskChunkStore::new(dir.path()));
        let victim = "victim-000000".to_string();
        let other = key_sharing_shard_with(&victim, "other");

        for _ in 0..500 {
            store.put(&victim, Bytes::from_static(b"old")).await.unwrap();

            let deleter = {
                let store = store.clone();
                let keys = vec![victim.clone()];
                tokio::spawn(async move { store.delete_all(&keys).await })
            };
            let writer = {
                let store = store.clone();
                let key = other.clone();
                tokio::spawn(async move { store.put(&key, Bytes::from_static(b"new")).await })
            };

            deleter.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();
            assert!(store.contains(&other).await.unwrap());
            store.delete_all(std::slice::from_ref(&other)).await.unwrap();
        }

        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_keys_that_escape_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::new(dir.path());

        for key in ["", "../evil", "a/b", ".hidden"] {
            let err = store.put(key, Bytes::from_static(b"x")).await.unwrap_err();
            assert!(err.is_server_fault(), "key {key:?} should be refused");
        }
        assert!(!store.contains("../evil").await.unwrap());
    }

    #[tokio::test]
    async fn health_check_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskChunkStore::new(dir.path().join("chunks"));

        store.health_check().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        let mut entries = fs::read_dir(store.base_path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
