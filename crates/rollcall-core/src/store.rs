//! Store contracts the matching workflow is written against.
//!
//! Concrete adapters (Qdrant, SQLite, Cloudinary, local directory) live in
//! `rollcall-store`; in-memory doubles live in [`crate::memory`].

use crate::types::{Embedding, IdentityKey, IdentityRecord, Neighbor, Payload};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector index request failed: {0}")]
    Request(String),
    #[error("vector index returned an unexpected response: {0}")]
    Protocol(String),
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum IdentityStoreError {
    #[error("identity {0} already exists")]
    DuplicateKey(IdentityKey),
    #[error("identity store: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object upload failed: {0}")]
    Upload(String),
    #[error("object storage I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Nearest-neighbor index over face embeddings, keyed by identity.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite the vector for `key`.
    async fn upsert(&self, key: IdentityKey, embedding: &Embedding, payload: Payload) -> Result<(), IndexError>;

    /// Up to `top_k` neighbors ordered by descending cosine similarity.
    async fn search(&self, probe: &Embedding, top_k: usize) -> Result<Vec<Neighbor>, IndexError>;

    /// Remove the vector for `key`. Removing an absent key is not an error.
    async fn delete(&self, key: IdentityKey) -> Result<(), IndexError>;
}

/// Document store of identity records.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new record; an existing key fails with
    /// [`IdentityStoreError::DuplicateKey`] and leaves the stored record intact.
    async fn insert(&self, record: &IdentityRecord) -> Result<(), IdentityStoreError>;

    async fn get(&self, key: IdentityKey) -> Result<Option<IdentityRecord>, IdentityStoreError>;
}

/// Durable storage for enrollment face crops.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a JPEG under a name hint and return a stable reference (URL or path).
    async fn upload(&self, name_hint: &str, jpeg: Vec<u8>) -> Result<String, ObjectStoreError>;

    /// Short backend name for status reporting.
    fn kind(&self) -> &'static str;
}
