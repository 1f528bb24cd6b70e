//! Represents a stored image and the chunks that hold its bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle to a stored object.
///
/// Issued once per upload and never reused. Callers may present any string;
/// one that was never issued simply does not resolve.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Mint a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the `seq`-th chunk belonging to this object.
    pub fn chunk_key(&self, seq: usize) -> String {
        format!("{}-{:06}", self.0, seq)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Index record for one stored object.
///
/// The bytes themselves live in the chunk store; `chunk_refs` lists their
/// keys in reassembly order and `total_size` is the sum of their lengths.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub id: ObjectId,

    /// Filename as supplied by the uploader.
    pub original_name: String,

    /// Lower-cased extension including the leading dot, e.g. `.png`.
    pub extension: String,

    pub total_size: u64,

    /// Ordered chunk keys. Empty only for a zero-byte object.
    pub chunk_refs: Vec<String>,

    /// When the object became visible in the index.
    pub created_at: DateTime<Utc>,
}
