//! The storage seam: sessions talk to any vector store through
//! [`DocumentStore`], and backends are constructed through
//! [`DocumentStoreFactory`] so the session layer never names a concrete
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::document::{Document, ScoredDocument};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store is closed")]
    Closed,
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),
}

/// Durable per-session document storage with vector search.
///
/// One instance maps to one collection; collections for different sessions
/// are fully disjoint. All methods are safe to call concurrently.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ensure the collection exists. Idempotent.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Persist documents that carry a non-empty embedding; documents without
    /// one are skipped. Returns how many were stored. Re-adding an existing
    /// id overwrites it.
    async fn add(&self, documents: Vec<Document>) -> Result<usize, StoreError>;

    /// Nearest neighbors by embedding distance, best first, scored as
    /// `1 / (1 + distance)`. `file_filter` restricts results to one file.
    async fn search(
        &self,
        embedding: Vec<f32>,
        limit: usize,
        file_filter: Option<String>,
    ) -> Result<Vec<ScoredDocument>, StoreError>;

    /// Every document in the collection, embeddings included. Feeds lexical
    /// index rebuilds.
    async fn scroll_all(&self) -> Result<Vec<Document>, StoreError>;

    /// Documents for one file, ordered by start line.
    async fn get_by_file(&self, file_path: &str) -> Result<Vec<Document>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Drop every document in the collection, leaving it empty but usable.
    async fn delete_collection(&self) -> Result<(), StoreError>;

    /// Release the underlying resources. Further calls fail with
    /// [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}

/// Opens stores by collection name.
pub trait DocumentStoreFactory: Send + Sync {
    fn open(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<Arc<dyn DocumentStore>, StoreError>;
}
