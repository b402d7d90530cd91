//! SQLite + sqlite-vec backed [`DocumentStore`].
//!
//! Each collection is its own database file under the factory's root
//! directory, so deleting a session is deleting a file and sessions can
//! never see each other's documents. Document rows live in a plain table;
//! their embeddings are mirrored into a `vec0` virtual table keyed by the
//! document rowid for KNN search.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{debug, warn};

use crate::document::{Document, DocumentMetadata, ScoredDocument};
use crate::store::{DocumentStore, DocumentStoreFactory, StoreError};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register sqlite-vec as an auto-extension, exactly once per process.
///
/// # Safety
///
/// `sqlite3_vec_init` is a valid extension entry point exported by the
/// sqlite-vec crate; the transmute adapts its declared signature to the
/// opaque pointer `sqlite3_auto_extension` expects, following the pattern
/// from sqlite-vec's own tests. `Once` prevents double registration.
fn init_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut std::os::raw::c_char,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> std::os::raw::c_int,
            >(sqlite3_vec_init as *const ())));
        }
        tracing::debug!("sqlite-vec extension registered");
    });
}

pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 4 != 0 {
        warn!(len = bytes.len(), "embedding blob length not divisible by 4");
        return Vec::new();
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Option<Connection>>>,
    dimension: usize,
}

impl SqliteDocumentStore {
    /// Open or create the collection database at `path`.
    pub fn open(path: &Path, dimension: usize) -> Result<Self, StoreError> {
        init_sqlite_vec();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        ensure_schema(&conn, dimension)?;
        debug!(path = %path.display(), dimension, "opened document store");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            dimension,
        })
    }

    pub fn open_in_memory(dimension: usize) -> Result<Self, StoreError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn, dimension)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            dimension,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            let conn = guard.as_ref().ok_or(StoreError::Closed)?;
            f(conn)
        })
        .await?
    }
}

fn ensure_schema(conn: &Connection, dimension: usize) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            file_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            symbol_name TEXT NOT NULL,
            enclosing_type TEXT,
            start_line INTEGER NOT NULL,
            embedding BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_file ON documents(file_path);",
    )?;
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS documents_vec USING vec0(
            doc_rowid INTEGER PRIMARY KEY,
            embedding float[{dimension}]
        );"
    ))?;
    Ok(())
}

fn row_to_document(row: &rusqlite::Row<'_>, embedding: Option<Vec<f32>>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        content: row.get(1)?,
        metadata: DocumentMetadata {
            file_path: row.get(2)?,
            kind: row.get(3)?,
            symbol_name: row.get(4)?,
            enclosing_type: row.get(5)?,
            start_line: row.get::<_, i64>(6)? as usize,
        },
        embedding,
    })
}

const DOC_COLUMNS: &str = "id, content, file_path, kind, symbol_name, enclosing_type, start_line";

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        let dimension = self.dimension;
        self.with_conn(move |conn| ensure_schema(conn, dimension)).await
    }

    async fn add(&self, documents: Vec<Document>) -> Result<usize, StoreError> {
        let dimension = self.dimension;
        self.with_conn(move |conn| {
            conn.execute("BEGIN IMMEDIATE", [])?;
            let result = (|| -> Result<usize, StoreError> {
                let mut added = 0usize;
                for doc in &documents {
                    let Some(embedding) = doc.embedding.as_ref().filter(|e| !e.is_empty()) else {
                        continue;
                    };
                    if embedding.len() != dimension {
                        warn!(
                            id = %doc.id,
                            expected = dimension,
                            got = embedding.len(),
                            "dropping document with mismatched embedding dimension"
                        );
                        continue;
                    }

                    // Replacing a document gets a fresh rowid; drop the old
                    // vector row first so the vec table never holds orphans.
                    let old_rowid: Option<i64> = conn
                        .query_row(
                            "SELECT rowid FROM documents WHERE id = ?1",
                            [&doc.id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(rowid) = old_rowid {
                        conn.execute("DELETE FROM documents_vec WHERE doc_rowid = ?1", [rowid])?;
                    }

                    let bytes = embedding_to_bytes(embedding);
                    conn.execute(
                        "INSERT OR REPLACE INTO documents
                            (id, content, file_path, kind, symbol_name, enclosing_type, start_line, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            doc.id,
                            doc.content,
                            doc.metadata.file_path,
                            doc.metadata.kind,
                            doc.metadata.symbol_name,
                            doc.metadata.enclosing_type,
                            doc.metadata.start_line as i64,
                            bytes,
                        ],
                    )?;
                    let rowid = conn.last_insert_rowid();
                    conn.execute(
                        "INSERT INTO documents_vec(doc_rowid, embedding) VALUES (?1, ?2)",
                        params![rowid, bytes],
                    )?;
                    added += 1;
                }
                Ok(added)
            })();

            match result {
                Ok(added) => {
                    conn.execute("COMMIT", [])?;
                    debug!(added, total = documents.len(), "stored documents");
                    Ok(added)
                }
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", []);
                    Err(e)
                }
            }
        })
        .await
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        limit: usize,
        file_filter: Option<String>,
    ) -> Result<Vec<ScoredDocument>, StoreError> {
        if embedding.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(move |conn| {
            // KNN cannot pre-filter by file, so overfetch and trim.
            let fetch = if file_filter.is_some() { limit * 10 } else { limit };
            let bytes = embedding_to_bytes(&embedding);

            let mut stmt = conn.prepare(&format!(
                "SELECT {DOC_COLUMNS}, v.distance
                 FROM (SELECT doc_rowid, distance FROM documents_vec
                       WHERE embedding MATCH ?1
                       ORDER BY distance LIMIT ?2) v
                 JOIN documents ON documents.rowid = v.doc_rowid
                 ORDER BY v.distance"
            ))?;

            let rows = stmt
                .query_map(params![bytes, fetch as i64], |row| {
                    let document = row_to_document(row, None)?;
                    let distance: f32 = row.get(7)?;
                    Ok(ScoredDocument {
                        document,
                        score: 1.0 / (1.0 + distance),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let results: Vec<ScoredDocument> = rows
                .into_iter()
                .filter(|s| {
                    file_filter
                        .as_deref()
                        .is_none_or(|f| s.document.metadata.file_path == f)
                })
                .take(limit)
                .collect();
            Ok(results)
        })
        .await
    }

    async fn scroll_all(&self) -> Result<Vec<Document>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOC_COLUMNS}, embedding FROM documents ORDER BY file_path, start_line"
            ))?;
            let docs = stmt
                .query_map([], |row| {
                    let bytes: Vec<u8> = row.get(7)?;
                    row_to_document(row, Some(embedding_from_bytes(&bytes)))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(docs)
        })
        .await
    }

    async fn get_by_file(&self, file_path: &str) -> Result<Vec<Document>, StoreError> {
        let file_path = file_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOC_COLUMNS} FROM documents WHERE file_path = ?1 ORDER BY start_line"
            ))?;
            let docs = stmt
                .query_map([&file_path], |row| row_to_document(row, None))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(docs)
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn delete_collection(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "DELETE FROM documents_vec;
                 DELETE FROM documents;",
            )?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            // Dropping the connection flushes WAL.
            guard.take();
            Ok(())
        })
        .await?
    }
}

/// One database file per collection under `root`.
pub struct SqliteStoreFactory {
    root: PathBuf,
}

impl SqliteStoreFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.db"))
    }
}

impl DocumentStoreFactory for SqliteStoreFactory {
    fn open(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<Arc<dyn DocumentStore>, StoreError> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StoreError::InvalidCollection(collection.to_string()));
        }
        let store = SqliteDocumentStore::open(&self.collection_path(collection), dimension)?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, file: &str, line: usize, embedding: Vec<f32>) -> Document {
        Document {
            id: id.to_string(),
            content: format!("content of {id}"),
            metadata: DocumentMetadata {
                file_path: file.to_string(),
                kind: "function".to_string(),
                symbol_name: id.to_string(),
                enclosing_type: None,
                start_line: line,
            },
            embedding: Some(embedding),
        }
    }

    #[tokio::test]
    async fn add_skips_documents_without_embeddings() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        let mut empty = doc("b", "a.py", 2, vec![]);
        empty.embedding = None;
        let added = store
            .add(vec![doc("a", "a.py", 1, vec![1.0, 0.0, 0.0, 0.0]), empty])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_drops_mismatched_dimension() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        let added = store
            .add(vec![doc("a", "a.py", 1, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn search_returns_nearest_first() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        store
            .add(vec![
                doc("x", "x.py", 1, vec![1.0, 0.0, 0.0, 0.0]),
                doc("y", "y.py", 1, vec![0.0, 1.0, 0.0, 0.0]),
                doc("z", "z.py", 1, vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .search(vec![0.9, 0.1, 0.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "x");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn file_filter_restricts_results() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        store
            .add(vec![
                doc("x", "x.py", 1, vec![1.0, 0.0, 0.0, 0.0]),
                doc("y", "y.py", 1, vec![0.9, 0.1, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .search(vec![1.0, 0.0, 0.0, 0.0], 5, Some("y.py".to_string()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "y");
    }

    #[tokio::test]
    async fn get_by_file_is_ordered_by_line() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        store
            .add(vec![
                doc("late", "a.py", 40, vec![0.0, 1.0, 0.0, 0.0]),
                doc("early", "a.py", 3, vec![1.0, 0.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();
        let docs = store.get_by_file("a.py").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "early");
        assert_eq!(docs[1].id, "late");
    }

    #[tokio::test]
    async fn readding_same_id_overwrites() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        store
            .add(vec![doc("a", "a.py", 1, vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        let mut updated = doc("a", "a.py", 1, vec![0.0, 1.0, 0.0, 0.0]);
        updated.content = "updated".to_string();
        store.add(vec![updated]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.search(vec![0.0, 1.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].document.content, "updated");
    }

    #[tokio::test]
    async fn delete_collection_leaves_store_usable() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        store
            .add(vec![doc("a", "a.py", 1, vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        store.delete_collection().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        store
            .add(vec![doc("b", "b.py", 1, vec![0.0, 1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn close_rejects_further_use() {
        let store = SqliteDocumentStore::open_in_memory(4).unwrap();
        store.close().await.unwrap();
        assert!(matches!(store.count().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn factory_validates_collection_names() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteStoreFactory::new(dir.path());
        assert!(factory.open("repo_abc123_owner_name", 4).is_ok());
        assert!(matches!(
            factory.open("../escape", 4),
            Err(StoreError::InvalidCollection(_))
        ));
        assert!(matches!(
            factory.open("", 4),
            Err(StoreError::InvalidCollection(_))
        ));
    }

    #[tokio::test]
    async fn collections_are_disjoint_files() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteStoreFactory::new(dir.path());
        let a = factory.open("session_a", 4).unwrap();
        let b = factory.open("session_b", 4).unwrap();

        a.add(vec![doc("only-a", "a.py", 1, vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
    }
}
