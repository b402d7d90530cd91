use codescout_embeddings::EmbedError;
use codescout_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbedError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("could not acquire lock on {key} within {waited_secs}s")]
    LockTimeout { key: String, waited_secs: u64 },
    #[error("lock backend error: {0}")]
    LockBackend(String),
}
