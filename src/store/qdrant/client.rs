//! HTTP client wrapper implementing [`ChunkStore`] on top of Qdrant.

use super::{
    filters::build_chunk_filter,
    payload::{build_payload, parse_payload},
    types::{CountResponse, QueryResponse},
};
use crate::store::{ChunkFilter, ChunkPoint, ChunkStore, ScoredChunk, StoreError, rank};
use crate::transport::{
    HttpTransport, TransportError, decode_json, format_endpoint, normalize_base_url,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};

/// Candidate pool multiplier compensating for post-filtering.
const OVERFETCH_FACTOR: usize = 10;

/// Payload fields that receive keyword indexes.
const INDEXED_FIELDS: [&str; 4] = ["user_id", "index_namespace", "section_id", "generation"];

/// Chunk store persisting into one Qdrant collection.
pub struct QdrantChunkStore {
    transport: HttpTransport,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    vector_size: usize,
}

impl QdrantChunkStore {
    /// Build a store for `collection` at `url`.
    pub fn new(
        transport: HttpTransport,
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let base_url = normalize_base_url(url)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            transport,
            base_url,
            api_key,
            collection: collection.into(),
            vector_size,
        })
    }

    fn request(&self, client: &Client, method: Method, path: &str) -> RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    fn points_path(&self, suffix: &str) -> String {
        format!("collections/{}/points{suffix}", self.collection)
    }

    async fn collection_exists(&self) -> Result<bool, StoreError> {
        let path = format!("collections/{}", self.collection);
        match self
            .transport
            .send(|client| self.request(client, Method::GET, &path))
            .await
        {
            Ok(_) => Ok(true),
            Err(TransportError::NotFound { .. }) => Ok(false),
            Err(error) => {
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error.into())
            }
        }
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        let path = format!("collections/{}", self.collection);
        let body = json!({
            "vectors": {
                "size": self.vector_size,
                "distance": "Cosine"
            }
        });
        self.transport
            .send(|client| self.request(client, Method::PUT, &path).json(&body))
            .await?;
        tracing::info!(
            collection = %self.collection,
            vector_size = self.vector_size,
            "Collection created"
        );
        Ok(())
    }

    async fn ensure_payload_indexes(&self) -> Result<(), StoreError> {
        let path = format!("collections/{}/index", self.collection);
        for field in INDEXED_FIELDS {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });
            match self
                .transport
                .send(|client| self.request(client, Method::PUT, &path).json(&body))
                .await
            {
                Ok(_) => {
                    tracing::debug!(collection = %self.collection, field, "Payload index ensured");
                }
                Err(error) if error.status() == Some(StatusCode::CONFLICT) => {
                    tracing::debug!(collection = %self.collection, field, "Payload index already exists");
                }
                Err(error) => {
                    tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for QdrantChunkStore {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        if !self.collection_exists().await? {
            self.create_collection().await?;
        }
        self.ensure_payload_indexes().await
    }

    async fn upsert(&self, chunks: Vec<ChunkPoint>) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let count = chunks.len();
        let points: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.record.chunk_id,
                    "vector": chunk.vector,
                    "payload": build_payload(&chunk.record),
                })
            })
            .collect();
        let body = json!({ "points": points });
        let path = self.points_path("");
        self.transport
            .send(|client| {
                self.request(client, Method::PUT, &path)
                    .query(&[("wait", true)])
                    .json(&body)
            })
            .await?;
        tracing::debug!(collection = %self.collection, points = count, "Points upserted");
        Ok(count)
    }

    async fn delete(&self, filter: &ChunkFilter) -> Result<usize, StoreError> {
        let matching = self.count(filter).await?;
        if matching == 0 {
            return Ok(0);
        }
        let body = json!({ "filter": build_chunk_filter(filter) });
        let path = self.points_path("/delete");
        self.transport
            .send(|client| {
                self.request(client, Method::POST, &path)
                    .query(&[("wait", true)])
                    .json(&body)
            })
            .await?;
        tracing::debug!(collection = %self.collection, user_id = %filter.user_id, deleted = matching, "Points deleted");
        Ok(matching)
    }

    async fn count(&self, filter: &ChunkFilter) -> Result<usize, StoreError> {
        let body = json!({ "filter": build_chunk_filter(filter), "exact": true });
        let path = self.points_path("/count");
        let url = format_endpoint(&self.base_url, &path);
        let response = self
            .transport
            .send(|client| self.request(client, Method::POST, &path).json(&body))
            .await?;
        let payload: CountResponse = decode_json(&url, response).await?;
        Ok(payload.result.count)
    }

    async fn search(
        &self,
        filter: &ChunkFilter,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let body = json!({
            "query": vector,
            "limit": top_k * OVERFETCH_FACTOR,
            "with_payload": true,
            "filter": build_chunk_filter(filter),
        });
        let path = self.points_path("/query");
        let url = format_endpoint(&self.base_url, &path);
        let response = self
            .transport
            .send(|client| self.request(client, Method::POST, &path).json(&body))
            .await?;
        let payload: QueryResponse = decode_json(&url, response).await?;

        let mut hits = Vec::new();
        for point in payload.result.into_points() {
            let id = stringify_point_id(point.id);
            let record = parse_payload(&id, point.payload).inspect_err(|error| {
                tracing::error!(collection = %self.collection, error = %error, "Malformed search hit");
            })?;
            if filter.matches(&record) {
                hits.push(ScoredChunk {
                    record,
                    score: point.score,
                });
            }
        }
        Ok(rank(hits, top_k))
    }
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
