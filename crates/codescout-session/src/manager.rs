//! Bounded cache of open sessions.
//!
//! Store handles hold file descriptors, so the set of simultaneously open
//! sessions is capped with LRU eviction; touching a session keeps it warm.
//! Evicted and closed sessions lose nothing durable, reopening them is just
//! a cache load.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use codescout_embeddings::Embedder;
use codescout_store::DocumentStoreFactory;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session_store::SessionStore;

pub const DEFAULT_MAX_OPEN_SESSIONS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub open_sessions: usize,
    pub capacity: usize,
}

pub struct SessionManager {
    sessions: Mutex<LruCache<String, Arc<SessionStore>>>,
    factory: Arc<dyn DocumentStoreFactory>,
    embedder: Arc<dyn Embedder>,
    data_dir: PathBuf,
    capacity: usize,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn DocumentStoreFactory>,
        embedder: Arc<dyn Embedder>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_capacity(factory, embedder, data_dir, DEFAULT_MAX_OPEN_SESSIONS)
    }

    pub fn with_capacity(
        factory: Arc<dyn DocumentStoreFactory>,
        embedder: Arc<dyn Embedder>,
        data_dir: impl Into<PathBuf>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            sessions: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            factory,
            embedder,
            data_dir: data_dir.into(),
            capacity,
        }
    }

    /// Fetch an open session or open it, touching it in LRU order either
    /// way. Opening may evict the coldest session, whose handle is closed
    /// in the background.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<SessionStore>, SessionError> {
        validate_session_id(session_id)?;

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return Ok(Arc::clone(session));
        }

        let factory = Arc::clone(&self.factory);
        let id = session_id.to_string();
        let dimension = self.embedder.dimension();
        let store =
            tokio::task::spawn_blocking(move || factory.open(&id, dimension)).await??;

        let session = Arc::new(SessionStore::new(
            session_id,
            store,
            Arc::clone(&self.embedder),
            &self.data_dir,
        ));
        if let Some((evicted_id, evicted)) =
            sessions.push(session_id.to_string(), Arc::clone(&session))
        {
            // push returns the displaced entry; only a different key means
            // an actual eviction.
            if evicted_id != session_id {
                info!(session = %evicted_id, "evicting least recently used session");
                tokio::spawn(async move {
                    if let Err(err) = evicted.close().await {
                        warn!(session = %evicted_id, error = %err, "failed to close evicted session");
                    }
                });
            }
        }
        debug!(session = %session_id, "session opened");
        Ok(session)
    }

    /// Close one session and drop it from the cache.
    pub async fn close(&self, session_id: &str) -> Result<bool, SessionError> {
        let popped = self.sessions.lock().await.pop(session_id);
        match popped {
            Some(session) => {
                session.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every open session, logging failures instead of stopping.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        while let Some((id, session)) = sessions.pop_lru() {
            if let Err(err) = session.close().await {
                warn!(session = %id, error = %err, "failed to close session");
            }
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            open_sessions: self.sessions.lock().await.len(),
            capacity: self.capacity,
        }
    }
}

fn validate_session_id(session_id: &str) -> Result<(), SessionError> {
    if session_id.is_empty()
        || !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SessionError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescout_embeddings::HashEmbedder;
    use codescout_store::SqliteStoreFactory;

    fn manager(dir: &std::path::Path, capacity: usize) -> SessionManager {
        SessionManager::with_capacity(
            Arc::new(SqliteStoreFactory::new(dir.join("collections"))),
            Arc::new(HashEmbedder::new(32)),
            dir.join("sessions"),
            capacity,
        )
    }

    #[tokio::test]
    async fn repeated_get_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 4);

        let a = manager.get_or_create("session_a").await.unwrap();
        let b = manager.get_or_create("session_a").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.stats().await.open_sessions, 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2);

        manager.get_or_create("session_a").await.unwrap();
        manager.get_or_create("session_b").await.unwrap();
        // Touch a so b becomes the eviction candidate.
        manager.get_or_create("session_a").await.unwrap();
        manager.get_or_create("session_c").await.unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats.open_sessions, 2);
        assert_eq!(stats.capacity, 2);

        // The evicted session reopens cleanly.
        manager.get_or_create("session_b").await.unwrap();
    }

    #[tokio::test]
    async fn close_removes_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 4);

        manager.get_or_create("session_a").await.unwrap();
        assert!(manager.close("session_a").await.unwrap());
        assert!(!manager.close("session_a").await.unwrap());
        assert_eq!(manager.stats().await.open_sessions, 0);
    }

    #[tokio::test]
    async fn close_all_drains_everything() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 4);
        manager.get_or_create("session_a").await.unwrap();
        manager.get_or_create("session_b").await.unwrap();

        manager.close_all().await;
        assert_eq!(manager.stats().await.open_sessions, 0);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 4);
        assert!(matches!(
            manager.get_or_create("../etc/passwd").await,
            Err(SessionError::InvalidSessionId(_))
        ));
        assert!(matches!(
            manager.get_or_create("").await,
            Err(SessionError::InvalidSessionId(_))
        ));
    }
}
