//! Per-repository indexing locks.
//!
//! Indexing the same repository from two places at once corrupts nothing
//! (the store is transactional) but wastes embedding calls and interleaves
//! progress, so writers take a lock keyed by session id. Three backends
//! cover the deployment spectrum: an in-process table for a single server,
//! lock files for processes sharing a data directory, and Redis for a
//! fleet (behind the `distributed-lock` feature).
//!
//! Every lock carries a TTL so a crashed holder cannot wedge a repository
//! forever.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SessionError;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Take the lock if free (or expired). Never blocks on a held lock.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError>;
    async fn release(&self, key: &str) -> Result<(), SessionError>;
    async fn is_locked(&self, key: &str) -> Result<bool, SessionError>;
}

/// Lock facade used by indexing paths.
pub struct RepoLock {
    backend: Arc<dyn LockBackend>,
    ttl: Duration,
    acquire_timeout: Duration,
}

impl RepoLock {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self {
            backend,
            ttl: DEFAULT_LOCK_TTL,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, ttl: Duration, acquire_timeout: Duration) -> Self {
        self.ttl = ttl;
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Poll until the lock is ours or the acquire timeout elapses.
    pub async fn acquire(&self, key: &str) -> Result<LockGuard, SessionError> {
        let started = Instant::now();
        loop {
            if self.backend.try_acquire(key, self.ttl).await? {
                debug!(key, "lock acquired");
                return Ok(LockGuard::new(Arc::clone(&self.backend), key.to_string()));
            }
            if started.elapsed() >= self.acquire_timeout {
                return Err(SessionError::LockTimeout {
                    key: key.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// One attempt, `None` if somebody else holds the lock.
    pub async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, SessionError> {
        if self.backend.try_acquire(key, self.ttl).await? {
            Ok(Some(LockGuard::new(
                Arc::clone(&self.backend),
                key.to_string(),
            )))
        } else {
            Ok(None)
        }
    }

    pub async fn is_locked(&self, key: &str) -> Result<bool, SessionError> {
        self.backend.is_locked(key).await
    }

    /// Release without holding the guard. Operator escape hatch for locks
    /// left behind by a crashed holder.
    pub async fn force_release(&self, key: &str) -> Result<(), SessionError> {
        warn!(key, "forcing lock release");
        self.backend.release(key).await
    }
}

/// Held lock; released explicitly or, best-effort, on drop.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    fn new(backend: Arc<dyn LockBackend>, key: String) -> Self {
        Self {
            backend,
            key,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> Result<(), SessionError> {
        self.released = true;
        self.backend.release(&self.key).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let key = std::mem::take(&mut self.key);
        // Drop cannot await; release in a task when a runtime is around,
        // otherwise the TTL reclaims the lock.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = backend.release(&key).await {
                    warn!(key, error = %err, "failed to release lock on drop");
                }
            });
        } else {
            warn!(key, "lock guard dropped outside a runtime; ttl will expire it");
        }
    }
}

/// Lock table for a single process.
#[derive(Default)]
pub struct InProcessLockBackend {
    held: std::sync::Mutex<HashMap<String, Instant>>,
}

impl InProcessLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for InProcessLockBackend {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        let mut held = self.held.lock().map_err(|_| {
            SessionError::LockBackend("in-process lock table poisoned".to_string())
        })?;
        let now = Instant::now();
        match held.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                held.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<(), SessionError> {
        let mut held = self.held.lock().map_err(|_| {
            SessionError::LockBackend("in-process lock table poisoned".to_string())
        })?;
        held.remove(key);
        Ok(())
    }

    async fn is_locked(&self, key: &str) -> Result<bool, SessionError> {
        let held = self.held.lock().map_err(|_| {
            SessionError::LockBackend("in-process lock table poisoned".to_string())
        })?;
        Ok(held.get(key).is_some_and(|expiry| *expiry > Instant::now()))
    }
}

#[derive(Serialize)]
struct LockFileBody {
    pid: u32,
    acquired_unix: u64,
}

/// Lock files for processes sharing one data directory.
///
/// Creation with `create_new` is the atomic acquire; a file older than the
/// TTL (by mtime) counts as abandoned and is taken over.
pub struct FileLockBackend {
    dir: PathBuf,
}

impl FileLockBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.lock"))
    }

    async fn create(&self, key: &str) -> Result<bool, SessionError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec(&LockFileBody {
            pid: std::process::id(),
            acquired_unix: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        })?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(key))
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&body).await?;
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_stale(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        match tokio::fs::metadata(self.lock_path(key)).await {
            Ok(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .unwrap_or(Duration::ZERO);
                Ok(age > ttl)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl LockBackend for FileLockBackend {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        if self.create(key).await? {
            return Ok(true);
        }
        if !self.is_stale(key, ttl).await? {
            return Ok(false);
        }

        // Claim the expired file by renaming it aside; rename is atomic, so
        // of several waiters racing past the same expired lock only one can
        // claim it and take over.
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let claimed = self
            .dir
            .join(format!("{key}.expired.{}.{nonce}", std::process::id()));
        match tokio::fs::rename(self.lock_path(key), &claimed).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        // The file may have been replaced between the staleness check and
        // the rename; a still-fresh claim goes back untouched.
        let age = tokio::fs::metadata(&claimed)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|m| m.elapsed().ok())
            .unwrap_or(Duration::ZERO);
        if age <= ttl {
            let _ = tokio::fs::rename(&claimed, self.lock_path(key)).await;
            return Ok(false);
        }

        warn!(key, "taking over stale lock file");
        let _ = tokio::fs::remove_file(&claimed).await;
        self.create(key).await
    }

    async fn release(&self, key: &str) -> Result<(), SessionError> {
        match tokio::fs::remove_file(self.lock_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool, SessionError> {
        match tokio::fs::metadata(self.lock_path(key)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(feature = "distributed-lock")]
pub use redis_backend::RedisLockBackend;

#[cfg(feature = "distributed-lock")]
mod redis_backend {
    use super::*;

    fn redis_key(key: &str) -> String {
        format!("codescout:lock:{key}")
    }

    /// `SET NX EX` based lock for multi-host deployments.
    pub struct RedisLockBackend {
        client: redis::Client,
        token: String,
    }

    impl RedisLockBackend {
        pub fn new(url: &str) -> Result<Self, SessionError> {
            let client = redis::Client::open(url)
                .map_err(|e| SessionError::LockBackend(e.to_string()))?;
            let nonce = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(Self {
                client,
                token: format!("{}:{nonce}", std::process::id()),
            })
        }

        async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, SessionError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| SessionError::LockBackend(e.to_string()))
        }
    }

    #[async_trait]
    impl LockBackend for RedisLockBackend {
        async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
            let mut conn = self.conn().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(redis_key(key))
                .arg(&self.token)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await
                .map_err(|e| SessionError::LockBackend(e.to_string()))?;
            Ok(reply.is_some())
        }

        async fn release(&self, key: &str) -> Result<(), SessionError> {
            let mut conn = self.conn().await?;
            redis::cmd("DEL")
                .arg(redis_key(key))
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| SessionError::LockBackend(e.to_string()))?;
            Ok(())
        }

        async fn is_locked(&self, key: &str) -> Result<bool, SessionError> {
            let mut conn = self.conn().await?;
            let exists: bool = redis::cmd("EXISTS")
                .arg(redis_key(key))
                .query_async(&mut conn)
                .await
                .map_err(|e| SessionError::LockBackend(e.to_string()))?;
            Ok(exists)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_lock(backend: Arc<dyn LockBackend>) -> RepoLock {
        RepoLock::new(backend)
            .with_timeouts(Duration::from_secs(300), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let lock = fast_lock(Arc::new(InProcessLockBackend::new()));
        let guard = lock.acquire("repo_a").await.unwrap();

        let err = lock.acquire("repo_a").await.unwrap_err();
        assert!(matches!(err, SessionError::LockTimeout { .. }));

        guard.release().await.unwrap();
        let reacquired = lock.acquire("repo_a").await.unwrap();
        reacquired.release().await.unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let lock = fast_lock(Arc::new(InProcessLockBackend::new()));
        let a = lock.acquire("repo_a").await.unwrap();
        let b = lock.acquire("repo_b").await.unwrap();
        a.release().await.unwrap();
        b.release().await.unwrap();
    }

    #[tokio::test]
    async fn try_acquire_reports_contention() {
        let lock = fast_lock(Arc::new(InProcessLockBackend::new()));
        let guard = lock.try_acquire("repo_a").await.unwrap().expect("free lock");
        assert!(lock.try_acquire("repo_a").await.unwrap().is_none());
        assert!(lock.is_locked("repo_a").await.unwrap());
        guard.release().await.unwrap();
        assert!(!lock.is_locked("repo_a").await.unwrap());
    }

    #[tokio::test]
    async fn expired_in_process_lock_is_reclaimed() {
        let backend = Arc::new(InProcessLockBackend::new());
        assert!(backend.try_acquire("repo_a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend.try_acquire("repo_a", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let backend: Arc<dyn LockBackend> = Arc::new(InProcessLockBackend::new());
        let lock = fast_lock(Arc::clone(&backend));
        {
            let _guard = lock.acquire("repo_a").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_locked("repo_a").await.unwrap());
    }

    #[tokio::test]
    async fn file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileLockBackend::new(dir.path()));
        let lock = fast_lock(backend);

        let guard = lock.acquire("repo_a").await.unwrap();
        assert!(lock.try_acquire("repo_a").await.unwrap().is_none());
        guard.release().await.unwrap();
        assert!(!lock.is_locked("repo_a").await.unwrap());
    }

    #[tokio::test]
    async fn stale_lock_file_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileLockBackend::new(dir.path());

        assert!(backend.try_acquire("repo_a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The old holder never released; age beyond the ttl means takeover.
        assert!(backend.try_acquire("repo_a", Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn racing_takeovers_yield_one_holder() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileLockBackend::new(dir.path());
        let ttl = Duration::from_millis(100);

        assert!(backend.try_acquire("repo_a", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Two waiters find the same expired lock at once.
        let (a, b) = tokio::join!(
            backend.try_acquire("repo_a", ttl),
            backend.try_acquire("repo_a", ttl)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a ^ b, "exactly one waiter may take over, got {a} and {b}");
        assert!(backend.is_locked("repo_a").await.unwrap());
    }
}
