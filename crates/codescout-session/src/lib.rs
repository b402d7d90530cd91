//! Per-repository retrieval sessions: hybrid search over a durable vector
//! store and a rebuildable BM25 index, an LRU-bounded session manager, and
//! repository locks for indexing.

pub mod error;
pub mod fuse;
pub mod lock;
pub mod manager;
pub mod session_id;
pub mod session_store;

pub use error::SessionError;
pub use fuse::{ResultSource, SearchResult, rrf_fuse};
pub use lock::{FileLockBackend, InProcessLockBackend, LockBackend, LockGuard, RepoLock};
pub use manager::{ManagerStats, SessionManager};
pub use session_id::{is_repo_session_id, normalize_repo_url, repo_session_id, sanitize_session_id};
pub use session_store::{SessionStats, SessionStore};

#[cfg(feature = "distributed-lock")]
pub use lock::RedisLockBackend;
