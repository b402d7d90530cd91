//! Environment-driven configuration shared by all commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use codescout_embeddings::{Embedder, HashEmbedder, RemoteEmbedder, RemoteEmbedderConfig};
use codescout_session::{
    FileLockBackend, InProcessLockBackend, LockBackend, RepoLock, SessionManager,
    repo_session_id, sanitize_session_id,
};
use codescout_store::SqliteStoreFactory;
use tracing::warn;

/// Files above this size are skipped during indexing.
pub const MAX_FILE_SIZE: u64 = 1_000_000;

pub struct AppConfig {
    pub data_dir: PathBuf,
    pub embed_url: Option<String>,
    pub embed_api_key: Option<String>,
    pub embed_model: String,
    pub embed_dimension: usize,
    pub lock_backend: String,
    pub redis_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var_os("CODESCOUT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".codescout")),
            embed_url: std::env::var("CODESCOUT_EMBED_URL").ok(),
            embed_api_key: std::env::var("CODESCOUT_EMBED_API_KEY").ok(),
            embed_model: std::env::var("CODESCOUT_EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embed_dimension: std::env::var("CODESCOUT_EMBED_DIMENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1536),
            lock_backend: std::env::var("CODESCOUT_LOCK_BACKEND")
                .unwrap_or_else(|_| "file".to_string()),
            redis_url: std::env::var("CODESCOUT_REDIS_URL").ok(),
        }
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        match &self.embed_url {
            Some(url) => {
                let remote = RemoteEmbedder::new(RemoteEmbedderConfig {
                    base_url: url.clone(),
                    api_key: self.embed_api_key.clone(),
                    model: self.embed_model.clone(),
                    dimension: self.embed_dimension,
                    request_timeout: Duration::from_secs(30),
                })?;
                Ok(Arc::new(remote))
            }
            None => {
                warn!(
                    "CODESCOUT_EMBED_URL not set; using deterministic hash embeddings \
                     (fine for evaluation, weak for real retrieval)"
                );
                Ok(Arc::new(HashEmbedder::default()))
            }
        }
    }

    pub fn manager(&self, embedder: Arc<dyn Embedder>) -> SessionManager {
        SessionManager::new(
            Arc::new(SqliteStoreFactory::new(self.data_dir.join("collections"))),
            embedder,
            self.data_dir.join("sessions"),
        )
    }

    pub fn lock(&self) -> Result<RepoLock> {
        let backend: Arc<dyn LockBackend> = match self.lock_backend.as_str() {
            "process" => Arc::new(InProcessLockBackend::new()),
            "file" => Arc::new(FileLockBackend::new(self.data_dir.join("locks"))),
            #[cfg(feature = "distributed-lock")]
            "redis" => {
                let url = self
                    .redis_url
                    .as_deref()
                    .context("CODESCOUT_REDIS_URL is required for the redis lock backend")?;
                Arc::new(codescout_session::RedisLockBackend::new(url)?)
            }
            other => bail!("unknown lock backend '{other}' (expected process, file, or redis)"),
        };
        Ok(RepoLock::new(backend))
    }
}

/// Session id from `--session` (sanitized as-is) or `--repo` (derived).
pub fn resolve_session_id(repo: Option<&str>, session: Option<&str>) -> Result<String> {
    match (repo, session) {
        (_, Some(name)) => Ok(sanitize_session_id(name)),
        (Some(url), None) => Ok(repo_session_id(url)?),
        (None, None) => bail!("provide --repo <url> or --session <name>"),
    }
}
