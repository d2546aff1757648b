//! Qdrant vector index over its REST API.
//!
//! Points are keyed by the numeric identity key and carry the display name
//! as payload. Writes use `wait=true` so a successful upsert is visible to
//! the next search.

use reqwest::{Client, RequestBuilder, Response};
use rollcall_core::{Embedding, IdentityKey, IndexError, Neighbor, Payload, VectorIndex, EMBEDDING_DIM};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct Exists {
    exists: bool,
}

#[derive(Deserialize)]
struct QueryResult {
    points: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

fn request_error(e: reqwest::Error) -> IndexError {
    IndexError::Request(e.to_string())
}

impl QdrantIndex {
    pub fn new(config: QdrantConfig) -> Result<Self, IndexError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(request_error)?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            collection: config.collection,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{path}", self.base_url, self.collection)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, IndexError> {
        let resp = self.authorized(builder).send().await.map_err(request_error)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Request(format!("HTTP {status}: {body}")));
        }
        Ok(resp)
    }

    /// Create the collection (128-d, cosine) unless it already exists.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let resp = self.send(self.client.get(self.url("/exists"))).await?;
        let exists: Envelope<Exists> = resp.json().await.map_err(|e| IndexError::Protocol(e.to_string()))?;
        if exists.result.exists {
            tracing::debug!(collection = %self.collection, "qdrant collection present");
            return Ok(());
        }

        self.send(self.client.put(self.url("")).json(&collection_body())).await?;
        tracing::info!(collection = %self.collection, dim = EMBEDDING_DIM, "qdrant collection created");
        Ok(())
    }
}

fn collection_body() -> Value {
    json!({ "vectors": { "size": EMBEDDING_DIM, "distance": "Cosine" } })
}

fn upsert_body(key: IdentityKey, embedding: &Embedding, payload: Payload) -> Value {
    json!({
        "points": [{
            "id": key.0,
            "vector": embedding.values,
            "payload": payload,
        }]
    })
}

fn query_body(probe: &Embedding, top_k: usize) -> Value {
    json!({ "query": probe.values, "limit": top_k, "with_payload": true })
}

fn parse_neighbors(body: Envelope<QueryResult>) -> Result<Vec<Neighbor>, IndexError> {
    body.result
        .points
        .into_iter()
        .map(|point| {
            let key = point_key(&point.id)?;
            Ok(Neighbor {
                key,
                score: point.score,
                payload: point.payload.unwrap_or_default(),
            })
        })
        .collect()
}

/// Point ids are written as integers; a UUID id means a foreign writer.
fn point_key(id: &Value) -> Result<IdentityKey, IndexError> {
    id.as_u64()
        .map(IdentityKey)
        .ok_or_else(|| IndexError::Protocol(format!("non-numeric point id {id}")))
}

#[async_trait::async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, key: IdentityKey, embedding: &Embedding, payload: Payload) -> Result<(), IndexError> {
        if embedding.dim() != EMBEDDING_DIM {
            return Err(IndexError::Dimension {
                expected: EMBEDDING_DIM,
                actual: embedding.dim(),
            });
        }
        let body = upsert_body(key, embedding, payload);
        self.send(self.client.put(self.url("/points?wait=true")).json(&body)).await?;
        tracing::debug!(%key, collection = %self.collection, "qdrant upsert");
        Ok(())
    }

    async fn search(&self, probe: &Embedding, top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        let resp = self
            .send(self.client.post(self.url("/points/query")).json(&query_body(probe, top_k)))
            .await?;
        let body: Envelope<QueryResult> = resp.json().await.map_err(|e| IndexError::Protocol(e.to_string()))?;
        parse_neighbors(body)
    }

    async fn delete(&self, key: IdentityKey) -> Result<(), IndexError> {
        let body = json!({ "points": [key.0] });
        self.send(self.client.post(self.url("/points/delete?wait=true")).json(&body)).await?;
        tracing::debug!(%key, collection = %self.collection, "qdrant delete");
        Ok(())
    }
}
