//! src/services/object_index.rs
//!
//! Object index: maps an object id to its metadata and ordered chunk keys.
//! Backed by SQLite; a record and its chunk rows are always written and
//! removed inside one transaction so readers never see half a record.

use crate::{
    errors::{StorageError, StorageResult},
    models::object::{ObjectId, ObjectMetadata},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{collections::HashMap, io, str::FromStr, sync::Arc};
use tracing::debug;

/// Rows per multi-value insert into `object_chunks`; keeps well below
/// SQLite's bound parameter limit.
const CHUNK_INSERT_BATCH: usize = 500;

#[async_trait]
pub trait ObjectIndex: Send + Sync {
    /// Insert or replace the record for `metadata.id`. Last writer wins.
    async fn put(&self, metadata: &ObjectMetadata) -> StorageResult<()>;

    /// Fails with `NotFound` if no record exists.
    async fn get(&self, id: &ObjectId) -> StorageResult<ObjectMetadata>;

    /// Remove the record if present. Removing an absent record succeeds.
    async fn delete(&self, id: &ObjectId) -> StorageResult<()>;

    /// Every record. Callers must not rely on the order.
    async fn list(&self) -> StorageResult<Vec<ObjectMetadata>>;

    async fn health_check(&self) -> StorageResult<()>;
}

#[derive(FromRow, Debug)]
struct ObjectRow {
    id: String,
    original_name: String,
    extension: String,
    total_size: i64,
    created_at: DateTime<Utc>,
}

impl ObjectRow {
    fn into_metadata(self, chunk_refs: Vec<String>) -> ObjectMetadata {
        ObjectMetadata {
            id: ObjectId::from(self.id),
            original_name: self.original_name,
            extension: self.extension,
            total_size: self.total_size.max(0) as u64,
            chunk_refs,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow, Debug)]
struct ChunkRow {
    object_id: String,
    chunk_key: String,
}

/// SQLite-backed object index.
#[derive(Clone, Debug)]
pub struct SqliteObjectIndex {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteObjectIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the database at `database_url`.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// A private in-memory database with the schema applied.
    ///
    /// Pinned to a single long-lived connection, since every SQLite
    /// connection to `:memory:` opens a separate database.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let index = Self::new(Arc::new(pool));
        index.migrate().await?;
        Ok(index)
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations").run(&*self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectIndex for SqliteObjectIndex {
    async fn put(&self, metadata: &ObjectMetadata) -> StorageResult<()> {
        let total_size = i64::try_from(metadata.total_size).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "object size exceeds index range")
        })?;
        let id = metadata.id.as_str();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO objects (id, original_name, extension, total_size, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                original_name = excluded.original_name,
                extension = excluded.extension,
                total_size = excluded.total_size,
                created_at = excluded.created_at
            "#,
        )
        .bind(id)
        .bind(&metadata.original_name)
        .bind(&metadata.extension)
        .bind(total_size)
        .bind(metadata.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_chunks WHERE object_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (batch_no, batch) in metadata.chunk_refs.chunks(CHUNK_INSERT_BATCH).enumerate() {
            let offset = batch_no * CHUNK_INSERT_BATCH;
            let mut builder =
                QueryBuilder::<Sqlite>::new("INSERT INTO object_chunks (object_id, seq, chunk_key) ");
            builder.push_values(batch.iter().enumerate(), |mut row, (i, key)| {
                row.push_bind(id)
                    .push_bind((offset + i) as i64)
                    .push_bind(key.as_str());
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(
            object_id = id,
            chunks = metadata.chunk_refs.len(),
            "indexed object"
        );
        Ok(())
    }

    async fn get(&self, id: &ObjectId) -> StorageResult<ObjectMetadata> {
        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, ObjectRow>(
            "SELECT id, original_name, extension, total_size, created_at
             FROM objects WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound(id.clone()),
            other => StorageError::from(other),
        })?;

        let chunk_refs = sqlx::query_scalar::<_, String>(
            "SELECT chunk_key FROM object_chunks WHERE object_id = ? ORDER BY seq ASC",
        )
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row.into_metadata(chunk_refs))
    }

    async fn delete(&self, id: &ObjectId) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_chunks WHERE object_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            debug!(object_id = %id, "index entry already absent");
        }
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<ObjectMetadata>> {
        let mut tx = self.db.begin().await?;
        let rows = sqlx::query_as::<_, ObjectRow>(
            "SELECT id, original_name, extension, total_size, created_at FROM objects",
        )
        .fetch_all(&mut *tx)
        .await?;
        let chunk_rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT object_id, chunk_key FROM object_chunks ORDER BY object_id, seq ASC",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut refs: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in chunk_rows {
            refs.entry(chunk.object_id).or_default().push(chunk.chunk_key);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let chunk_refs = refs.remove(&row.id).unwrap_or_default();
                row.into_metadata(chunk_refs)
            })
            .collect())
    }

    async fn health_check(&self) -> StorageResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(io::Error::other(format!("unexpected result: {}", value)).into());
        }
        Ok(())
    }
}
