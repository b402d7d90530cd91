//! Lexical cache persistence.
//!
//! The BM25 side of a session is rebuildable from the vector store, so this
//! cache is purely an optimization: a versioned JSON file holding the BM25
//! index, the documents it was built from (embeddings stripped), and the
//! set of indexed files. Anything wrong with the file, from a bad version
//! to truncated JSON, degrades to a rebuild, never to an error.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bm25::Bm25Index;
use crate::document::Document;
use crate::store::StoreError;

/// Bump whenever the cache layout or the BM25 serialization changes.
pub const CACHE_FORMAT_VERSION: &str = "bm25-v2";

#[derive(Debug, Serialize, Deserialize)]
pub struct LexicalCache {
    pub format_version: String,
    pub bm25: Bm25Index,
    pub documents: Vec<Document>,
    pub indexed_files: Vec<String>,
}

impl LexicalCache {
    pub fn new(bm25: Bm25Index, documents: Vec<Document>, indexed_files: Vec<String>) -> Self {
        Self {
            format_version: CACHE_FORMAT_VERSION.to_string(),
            bm25,
            documents: documents.iter().map(Document::without_embedding).collect(),
            indexed_files,
        }
    }

    /// Load a cache, or `None` when the file is absent, unreadable, corrupt,
    /// or from a different format version.
    pub fn load(path: &Path) -> Option<LexicalCache> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no lexical cache");
                return None;
            }
        };
        let cache: LexicalCache = match serde_json::from_str(&raw) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "lexical cache unreadable, will rebuild");
                return None;
            }
        };
        if cache.format_version != CACHE_FORMAT_VERSION {
            warn!(
                path = %path.display(),
                found = %cache.format_version,
                expected = CACHE_FORMAT_VERSION,
                "lexical cache format mismatch, will rebuild"
            );
            return None;
        }
        Some(cache)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), documents = self.documents.len(), "saved lexical cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMetadata;

    fn sample() -> LexicalCache {
        let doc = Document {
            id: "a.py#0".to_string(),
            content: "def handler(): pass".to_string(),
            metadata: DocumentMetadata {
                file_path: "a.py".to_string(),
                kind: "function".to_string(),
                symbol_name: "handler".to_string(),
                enclosing_type: None,
                start_line: 1,
            },
            embedding: Some(vec![0.1, 0.2]),
        };
        let bm25 = Bm25Index::build(&[vec!["def".to_string(), "handler".to_string()]]);
        LexicalCache::new(bm25, vec![doc], vec!["a.py".to_string()])
    }

    #[test]
    fn save_then_load_strips_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical.json");
        sample().save(&path).unwrap();

        let loaded = LexicalCache::load(&path).expect("cache loads");
        assert_eq!(loaded.documents.len(), 1);
        assert!(loaded.documents[0].embedding.is_none());
        assert_eq!(loaded.indexed_files, vec!["a.py".to_string()]);
        assert_eq!(loaded.bm25.len(), 1);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LexicalCache::load(&dir.path().join("nope.json")).is_none());
    }

    #[test]
    fn corrupt_json_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical.json");
        fs::write(&path, "{not json").unwrap();
        assert!(LexicalCache::load(&path).is_none());
    }

    #[test]
    fn version_mismatch_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexical.json");
        let mut cache = sample();
        cache.format_version = "bm25-v0".to_string();
        let raw = serde_json::to_string(&cache).unwrap();
        fs::write(&path, raw).unwrap();
        assert!(LexicalCache::load(&path).is_none());
    }
}
