//! Qdrant vector index over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{VectorError, VectorIndex, VectorPoint, VectorResult};
use crate::types::{Chunk, CourseId, RetrievedChunk};

/// Qdrant collection client. Points use cosine distance.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl QdrantIndex {
    /// Build a client for `collection` at `base_url` (e.g. `http://localhost:6333`).
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        collection: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> VectorResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| VectorError::Payload(format!("invalid Qdrant API key: {e}")))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            dimension,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn collection_exists(&self) -> VectorResult<bool> {
        let response = self.client.get(self.collection_url()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(response).await),
        }
    }

    async fn create_collection(&self) -> VectorResult<()> {
        let body = json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        tracing::info!(
            target: "vector",
            "created Qdrant collection '{}' (size {})",
            self.collection,
            self.dimension
        );
        Ok(())
    }

    async fn delete_collection(&self) -> VectorResult<()> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await
    }
}

async fn api_error(response: Response) -> VectorError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    VectorError::Api { status, body }
}

async fn ensure_success(response: Response) -> VectorResult<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(api_error(response).await)
    }
}

#[derive(Serialize)]
struct PointBody<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a Chunk,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    points: Vec<PointBody<'a>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl SearchResponse {
    fn into_chunks(self) -> VectorResult<Vec<RetrievedChunk>> {
        self.result
            .into_iter()
            .map(|point| {
                let payload = point
                    .payload
                    .ok_or_else(|| VectorError::Payload("point without payload".to_string()))?;
                let chunk: Chunk = serde_json::from_value(payload)
                    .map_err(|e| VectorError::Payload(e.to_string()))?;
                Ok(RetrievedChunk::new(chunk, point.score))
            })
            .collect()
    }
}

fn search_body(vector: &[f32], course_id: CourseId, limit: usize) -> serde_json::Value {
    json!({
        "vector": vector,
        "limit": limit,
        "with_payload": true,
        "filter": {
            "must": [{ "key": "course_id", "match": { "value": course_id.get() } }]
        }
    })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> VectorResult<()> {
        if self.collection_exists().await? {
            tracing::debug!(target: "vector", "collection '{}' already exists", self.collection);
            return Ok(());
        }
        self.create_collection().await
    }

    async fn recreate_collection(&self) -> VectorResult<()> {
        self.delete_collection().await?;
        self.create_collection().await
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> VectorResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        for point in &points {
            if point.vector.len() != self.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: self.dimension,
                    actual: point.vector.len(),
                });
            }
        }

        let body = UpsertBody {
            points: points
                .iter()
                .map(|p| PointBody {
                    id: p.id(),
                    vector: &p.vector,
                    payload: &p.chunk,
                })
                .collect(),
        };

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::debug!(target: "vector", "upserted {} points", points.len());
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        course_id: CourseId,
        limit: usize,
    ) -> VectorResult<Vec<RetrievedChunk>> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&search_body(vector, course_id, limit))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let parsed: SearchResponse = response.json().await?;
        parsed.into_chunks()
    }
}
