//! Embedding providers.
//!
//! Everything that turns text into vectors lives behind the [`Embedder`]
//! trait: a remote OpenAI-compatible gateway for real deployments and a
//! deterministic hash embedder for offline use and tests.
//!
//! Single-text embedding is fallible and callers decide how to degrade.
//! Batch embedding never fails as a whole: a failed batch yields empty
//! vectors for its slots so one bad request cannot sink a long indexing run.

pub mod hash;
pub mod remote;
pub mod retry;

pub use hash::HashEmbedder;
pub use remote::{RemoteEmbedder, RemoteEmbedderConfig};
pub use retry::RetryPolicy;

use async_trait::async_trait;

/// Texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 50;

/// Concurrent in-flight embedding requests.
pub const MAX_CONCURRENT_BATCHES: usize = 5;

/// Input cap in bytes, applied before any request is made.
pub const MAX_EMBED_BYTES: usize = 8000;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("embedding response malformed: {0}")]
    Malformed(String),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbedError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            EmbedError::Status { status, .. } => *status == 429 || *status >= 500,
            EmbedError::Malformed(_) | EmbedError::DimensionMismatch { .. } => false,
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Errors propagate so callers can degrade
    /// (for example, fall back to lexical-only search).
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed many texts, preserving order. Failed entries come back as
    /// empty vectors rather than failing the call.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Flatten newlines and cap length before sending text to a model.
pub fn preprocess(text: &str) -> String {
    let flattened = text.replace(['\n', '\r'], " ");
    let mut out = flattened.trim().to_string();
    if out.len() > MAX_EMBED_BYTES {
        let mut cut = MAX_EMBED_BYTES;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}
