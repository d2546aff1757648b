//! In-memory stores for tests and store-less demo runs.
//!
//! Brute-force cosine search; intended for small galleries only.

use crate::store::{IdentityStore, IdentityStoreError, IndexError, ObjectStore, ObjectStoreError, VectorIndex};
use crate::types::{Embedding, IdentityKey, IdentityRecord, Neighbor, Payload, EMBEDDING_DIM};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

fn poisoned<E>(_: E) -> String {
    "lock poisoned".to_string()
}

#[derive(Default)]
pub struct MemoryVectorIndex {
    points: RwLock<BTreeMap<IdentityKey, (Embedding, Payload)>>,
    searches: AtomicUsize,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `search` calls served so far.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.points.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: IdentityKey) -> Option<Embedding> {
        self.points.read().ok()?.get(&key).map(|(e, _)| e.clone())
    }
}

#[async_trait::async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, key: IdentityKey, embedding: &Embedding, payload: Payload) -> Result<(), IndexError> {
        if embedding.dim() != EMBEDDING_DIM {
            return Err(IndexError::Dimension {
                expected: EMBEDDING_DIM,
                actual: embedding.dim(),
            });
        }
        let mut points = self.points.write().map_err(|e| IndexError::Request(poisoned(e)))?;
        points.insert(key, (embedding.clone(), payload));
        Ok(())
    }

    async fn search(&self, probe: &Embedding, top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let points = self.points.read().map_err(|e| IndexError::Request(poisoned(e)))?;

        let mut ranked: Vec<Neighbor> = points
            .iter()
            .map(|(key, (embedding, payload))| Neighbor {
                key: *key,
                score: probe.similarity(embedding),
                payload: payload.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }

    async fn delete(&self, key: IdentityKey) -> Result<(), IndexError> {
        let mut points = self.points.write().map_err(|e| IndexError::Request(poisoned(e)))?;
        points.remove(&key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    records: RwLock<BTreeMap<IdentityKey, IdentityRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn insert(&self, record: &IdentityRecord) -> Result<(), IdentityStoreError> {
        let mut records = self.records.write().map_err(|e| IdentityStoreError::Backend(poisoned(e)))?;
        if records.contains_key(&record.identity_key) {
            return Err(IdentityStoreError::DuplicateKey(record.identity_key));
        }
        records.insert(record.identity_key, record.clone());
        Ok(())
    }

    async fn get(&self, key: IdentityKey) -> Result<Option<IdentityRecord>, IdentityStoreError> {
        let records = self.records.read().map_err(|e| IdentityStoreError::Backend(poisoned(e)))?;
        Ok(records.get(&key).cloned())
    }
}

/// Keeps uploads in memory and hands out `memory://` references.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<Vec<(String, Vec<u8>)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, name_hint: &str, jpeg: Vec<u8>) -> Result<String, ObjectStoreError> {
        let mut objects = self.objects.write().map_err(|e| ObjectStoreError::Upload(poisoned(e)))?;
        let reference = format!("memory://{}/{name_hint}.jpg", objects.len());
        objects.push((reference.clone(), jpeg));
        Ok(reference)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
