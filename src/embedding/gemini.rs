//! Gemini embedding client (`batchEmbedContents`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult, check_count};
use crate::types::EmbeddingIntent;

const MAX_RETRIES: usize = 3;
/// Upper bound on requests per batch call accepted by the API.
const MAX_BATCH: usize = 100;

pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    model_version: String,
}

impl GeminiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        model_version: impl Into<String>,
        timeout: Duration,
    ) -> EmbeddingResult<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(EmbeddingError::Model("missing Gemini API key".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| EmbeddingError::Model(format!("invalid Gemini API key: {e}")))?,
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let model = model.trim_start_matches("models/").to_string();
        let endpoint = format!(
            "{}/v1beta/models/{model}:batchEmbedContents",
            base_url.trim_end_matches('/')
        );

        Ok(Self {
            client,
            endpoint,
            model,
            dimension,
            model_version: model_version.into(),
        })
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        intent: EmbeddingIntent,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        let body = batch_request(&self.model, texts, intent, self.dimension);

        let mut attempt = 0usize;
        loop {
            let response = self.client.post(&self.endpoint).json(&body).send().await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: BatchEmbedResponse = resp.json().await?;
                    let vectors = parsed.into_vectors();
                    check_count(texts.len(), &vectors)?;
                    return Ok(vectors);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < MAX_RETRIES {
                        attempt += 1;
                        tracing::warn!(
                            target: "embedding",
                            "Gemini embeddings returned {status}, retry {attempt}"
                        );
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) if (err.is_timeout() || err.is_connect()) && attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

fn task_type(intent: EmbeddingIntent) -> &'static str {
    match intent {
        EmbeddingIntent::Index => "RETRIEVAL_DOCUMENT",
        EmbeddingIntent::Query => "RETRIEVAL_QUERY",
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

fn batch_request<'a>(
    model: &str,
    texts: &'a [String],
    intent: EmbeddingIntent,
    dimension: usize,
) -> BatchEmbedRequest<'a> {
    BatchEmbedRequest {
        requests: texts
            .iter()
            .map(|text| EmbedRequest {
                model: format!("models/{model}"),
                content: Content {
                    parts: [Part { text }],
                },
                task_type: task_type(intent),
                output_dimensionality: dimension,
            })
            .collect(),
    }
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

impl BatchEmbedResponse {
    fn into_vectors(self) -> Vec<Vec<f32>> {
        self.embeddings.into_iter().map(|e| e.values).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        intent: EmbeddingIntent,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            vectors.extend(self.embed_batch(batch, intent).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}
