//! OpenAI-compatible embedding gateway client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::{EMBED_BATCH_SIZE, EmbedError, Embedder, MAX_CONCURRENT_BATCHES, preprocess};

#[derive(Debug, Clone)]
pub struct RemoteEmbedderConfig {
    /// Base URL up to the API root, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub request_timeout: Duration,
}

impl Default for RemoteEmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct RemoteEmbedder {
    client: reqwest::Client,
    config: Arc<RemoteEmbedderConfig>,
    retry: RetryPolicy,
    batches: Arc<Semaphore>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(config: RemoteEmbedderConfig) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            retry: RetryPolicy::default(),
            batches: Arc::new(Semaphore::new(MAX_CONCURRENT_BATCHES)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One request for up to [`EMBED_BATCH_SIZE`] texts, result in input order.
    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&json!({
            "model": self.config.model,
            "input": inputs,
        }));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Malformed(e.to_string()))?;
        if parsed.data.len() != inputs.len() {
            return Err(EmbedError::Malformed(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|row| row.index);
        let mut out = Vec::with_capacity(parsed.data.len());
        for row in parsed.data {
            if row.embedding.len() != self.config.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.config.dimension,
                    got: row.embedding.len(),
                });
            }
            out.push(row.embedding);
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let input = vec![preprocess(text)];
        let mut vectors = self.retry.run("embed_text", || self.request(&input)).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Malformed("empty embeddings array".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut out = vec![Vec::new(); texts.len()];
        if texts.is_empty() {
            return out;
        }

        let mut tasks = JoinSet::new();
        for (batch_idx, batch) in texts.chunks(EMBED_BATCH_SIZE).enumerate() {
            let this = self.clone();
            let inputs: Vec<String> = batch.iter().map(|t| preprocess(t)).collect();
            tasks.spawn(async move {
                let _permit = this.batches.clone().acquire_owned().await;
                let result = this.retry.run("embed_batch", || this.request(&inputs)).await;
                (batch_idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((batch_idx, result)) = joined else {
                warn!("embedding batch task panicked");
                continue;
            };
            match result {
                Ok(vectors) => {
                    let offset = batch_idx * EMBED_BATCH_SIZE;
                    for (i, vector) in vectors.into_iter().enumerate() {
                        out[offset + i] = vector;
                    }
                }
                Err(err) => {
                    // Slots stay empty; the caller drops those documents.
                    warn!(batch = batch_idx, error = %err, "embedding batch failed");
                }
            }
        }

        debug!(
            texts = texts.len(),
            embedded = out.iter().filter(|v| !v.is_empty()).count(),
            "batch embedding complete"
        );
        out
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
