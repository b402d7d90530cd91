//! One repository's retrieval session.
//!
//! The durable half is the document store: chunk text, metadata, and
//! embeddings, owned by the store backend. The lexical half (BM25 over the
//! same documents) lives in memory behind an `Arc` snapshot and is
//! rebuildable at any time from the store, with a versioned cache file to
//! skip the rebuild on warm starts. Search reads whichever snapshot is
//! current; writers swap in a full replacement, so queries never see a
//! half-built index.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use codescout_chunker::Chunk;
use codescout_embeddings::Embedder;
use codescout_store::{
    Bm25Index, Document, DocumentMetadata, DocumentStore, LexicalCache, ScoredDocument, Tokenizer,
};
use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::fuse::{OVERSAMPLE_FACTOR, SearchResult, rrf_fuse};
use crate::session_id::sanitize_session_id;

#[derive(Default)]
struct LexicalState {
    bm25: Bm25Index,
    documents: Vec<Document>,
    indexed_files: BTreeSet<String>,
}

fn lexical_text(doc: &Document) -> String {
    format!(
        "{} {} {}",
        doc.metadata.file_path, doc.metadata.symbol_name, doc.content
    )
}

fn build_state(tokenizer: &Tokenizer, documents: Vec<Document>) -> LexicalState {
    let documents: Vec<Document> = documents.iter().map(Document::without_embedding).collect();
    let token_lists: Vec<Vec<String>> = documents
        .iter()
        .map(|d| tokenizer.tokenize(&lexical_text(d)))
        .collect();
    let indexed_files = documents
        .iter()
        .map(|d| d.metadata.file_path.clone())
        .collect();
    LexicalState {
        bm25: Bm25Index::build(&token_lists),
        documents,
        indexed_files,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub document_count: usize,
    pub file_count: usize,
}

pub struct SessionStore {
    session_id: String,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    dir: PathBuf,
    tokenizer: Tokenizer,
    lexical: RwLock<Arc<LexicalState>>,
    init: OnceCell<()>,
}

impl SessionStore {
    pub fn new(
        session_id: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let session_id = session_id.into();
        let dir = data_dir.into().join(&session_id);
        Self {
            session_id,
            store,
            embedder,
            dir,
            tokenizer: Tokenizer::default(),
            lexical: RwLock::new(Arc::new(LexicalState::default())),
            init: OnceCell::new(),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join("lexical.json")
    }

    fn context_path(&self) -> PathBuf {
        self.dir.join("context.json")
    }

    fn report_path(&self, language: &str) -> PathBuf {
        self.dir
            .join("reports")
            .join(format!("{}.md", sanitize_session_id(language)))
    }

    /// Lazy initialization: the collection plus the lexical snapshot, from
    /// cache when valid, from a store scroll otherwise. Runs once.
    async fn ensure_ready(&self) -> Result<(), SessionError> {
        self.init
            .get_or_try_init(|| async {
                self.store.initialize().await?;

                let cache_path = self.cache_path();
                let cached =
                    tokio::task::spawn_blocking(move || LexicalCache::load(&cache_path)).await?;

                let state = match cached {
                    Some(cache) => {
                        debug!(
                            session = %self.session_id,
                            documents = cache.documents.len(),
                            "lexical index loaded from cache"
                        );
                        LexicalState {
                            bm25: cache.bm25,
                            documents: cache.documents,
                            indexed_files: cache.indexed_files.into_iter().collect(),
                        }
                    }
                    None => {
                        let documents = self.store.scroll_all().await?;
                        info!(
                            session = %self.session_id,
                            documents = documents.len(),
                            "rebuilding lexical index from store"
                        );
                        let tokenizer = self.tokenizer.clone();
                        let state = tokio::task::spawn_blocking(move || {
                            build_state(&tokenizer, documents)
                        })
                        .await?;
                        if !state.documents.is_empty() {
                            self.persist_state(&state).await?;
                        }
                        state
                    }
                };

                *self.lexical.write().await = Arc::new(state);
                Ok::<(), SessionError>(())
            })
            .await?;
        Ok(())
    }

    async fn persist_state(&self, state: &LexicalState) -> Result<(), SessionError> {
        let cache = LexicalCache::new(
            state.bm25.clone(),
            state.documents.clone(),
            state.indexed_files.iter().cloned().collect(),
        );
        let path = self.cache_path();
        tokio::task::spawn_blocking(move || cache.save(&path)).await??;
        Ok(())
    }

    /// Next free `{file}#{ordinal}` ordinal per file, taken from the
    /// current lexical snapshot so sequential indexing never reuses an id.
    async fn next_ordinals(&self) -> HashMap<String, usize> {
        let state = self.lexical.read().await;
        let mut next: HashMap<String, usize> = HashMap::new();
        for doc in &state.documents {
            if let Some((file, ordinal)) = doc.id.rsplit_once('#') {
                if let Ok(n) = ordinal.parse::<usize>() {
                    let slot = next.entry(file.to_string()).or_insert(0);
                    *slot = (*slot).max(n + 1);
                }
            }
        }
        next
    }

    /// Embed and store chunks. Ids are `{file_path}#{ordinal}`; ordinals
    /// continue from the documents already indexed for the file, so two
    /// sequential calls accumulate documents instead of overwriting.
    /// Chunks whose embedding came back empty are dropped, not errors.
    pub async fn index_chunks(&self, chunks: &[Chunk]) -> Result<usize, SessionError> {
        self.ensure_ready().await?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;

        let mut ordinals = self.next_ordinals().await;
        let mut documents = Vec::with_capacity(chunks.len());
        let mut dropped = 0usize;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let ordinal = ordinals.entry(chunk.file_path.clone()).or_insert(0);
            let id = format!("{}#{}", chunk.file_path, ordinal);
            *ordinal += 1;

            if embedding.is_empty() {
                dropped += 1;
                continue;
            }
            documents.push(Document {
                id,
                content: chunk.content.clone(),
                metadata: DocumentMetadata {
                    file_path: chunk.file_path.clone(),
                    kind: chunk.kind.as_str().to_string(),
                    symbol_name: chunk.symbol_name.clone(),
                    enclosing_type: chunk.enclosing_type.clone(),
                    start_line: chunk.start_line,
                },
                embedding: Some(embedding),
            });
        }
        if dropped > 0 {
            warn!(
                session = %self.session_id,
                dropped,
                "chunks dropped: no embedding available"
            );
        }

        self.add_documents(documents).await
    }

    /// Store pre-embedded documents and fold them into the lexical index.
    /// Only documents the durable store will accept reach the lexical side,
    /// so the two halves always agree on membership.
    pub async fn add_documents(&self, documents: Vec<Document>) -> Result<usize, SessionError> {
        self.ensure_ready().await?;
        let dimension = self.embedder.dimension();
        let embedded: Vec<Document> = documents
            .into_iter()
            .filter(|d| match d.embedding.as_deref() {
                Some(e) if e.len() == dimension => true,
                Some(e) if !e.is_empty() => {
                    warn!(
                        id = %d.id,
                        expected = dimension,
                        got = e.len(),
                        "skipping document with mismatched embedding dimension"
                    );
                    false
                }
                _ => {
                    warn!(id = %d.id, "skipping document without embedding");
                    false
                }
            })
            .collect();
        if embedded.is_empty() {
            return Ok(0);
        }

        let added = self.store.add(embedded.clone()).await?;

        let current = Arc::clone(&*self.lexical.read().await);
        let tokenizer = self.tokenizer.clone();
        let state = tokio::task::spawn_blocking(move || {
            let new_ids: HashSet<&str> = embedded.iter().map(|d| d.id.as_str()).collect();
            let mut merged: Vec<Document> = current
                .documents
                .iter()
                .filter(|d| !new_ids.contains(d.id.as_str()))
                .cloned()
                .collect();
            merged.extend(embedded);
            build_state(&tokenizer, merged)
        })
        .await?;

        if let Err(err) = self.persist_state(&state).await {
            warn!(session = %self.session_id, error = %err, "failed to save lexical cache");
        }
        *self.lexical.write().await = Arc::new(state);

        info!(session = %self.session_id, added, "documents indexed");
        Ok(added)
    }

    /// Hybrid retrieval: vector and BM25 candidate lists, each oversampled
    /// past `top_k`, fused by reciprocal rank. A failed query embedding
    /// degrades to lexical-only instead of failing the search.
    pub async fn search_hybrid(
        &self,
        query: &str,
        top_k: usize,
        file_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>, SessionError> {
        self.ensure_ready().await?;
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let fetch = top_k * OVERSAMPLE_FACTOR;

        let vector_hits = match self.embedder.embed_text(query).await {
            Ok(embedding) if !embedding.is_empty() => {
                self.store
                    .search(embedding, fetch, file_filter.map(str::to_string))
                    .await?
            }
            Ok(_) => Vec::new(),
            Err(err) => {
                warn!(
                    session = %self.session_id,
                    error = %err,
                    "query embedding failed; falling back to lexical-only search"
                );
                Vec::new()
            }
        };

        let tokens = self.tokenizer.tokenize(query);
        let state = Arc::clone(&*self.lexical.read().await);
        let filter = file_filter.map(str::to_string);
        let lexical_hits: Vec<ScoredDocument> = tokio::task::spawn_blocking(move || {
            state
                .bm25
                .top_n(&tokens, fetch * 2)
                .into_iter()
                .filter_map(|(i, score)| {
                    state.documents.get(i).map(|d| ScoredDocument {
                        document: d.clone(),
                        score,
                    })
                })
                .filter(|hit| {
                    filter
                        .as_deref()
                        .is_none_or(|f| hit.document.metadata.file_path == f)
                })
                .take(fetch)
                .collect()
        })
        .await?;

        debug!(
            session = %self.session_id,
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            "retrieval candidates gathered"
        );
        Ok(rrf_fuse(vector_hits, lexical_hits, top_k))
    }

    /// Drop every indexed document and the lexical cache. Saved context and
    /// reports survive; they describe the repository, not the index.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.ensure_ready().await?;
        self.store.delete_collection().await?;
        *self.lexical.write().await = Arc::new(LexicalState::default());
        match tokio::fs::remove_file(self.cache_path()).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(session = %self.session_id, "session reset");
        Ok(())
    }

    /// Documents of one file, ordered by start line.
    pub async fn get_documents_by_file(
        &self,
        file_path: &str,
    ) -> Result<Vec<Document>, SessionError> {
        self.ensure_ready().await?;
        Ok(self.store.get_by_file(file_path).await?)
    }

    pub async fn indexed_files(&self) -> Result<Vec<String>, SessionError> {
        self.ensure_ready().await?;
        let state = self.lexical.read().await;
        Ok(state.indexed_files.iter().cloned().collect())
    }

    pub async fn has_index(&self) -> Result<bool, SessionError> {
        self.ensure_ready().await?;
        Ok(self.store.count().await? > 0)
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        self.ensure_ready().await?;
        let document_count = self.store.count().await?;
        let file_count = self.lexical.read().await.indexed_files.len();
        Ok(SessionStats {
            session_id: self.session_id.clone(),
            document_count,
            file_count,
        })
    }

    /// Persist arbitrary JSON context alongside the session.
    pub async fn save_context(&self, context: &serde_json::Value) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.context_path(), serde_json::to_vec_pretty(context)?).await?;
        Ok(())
    }

    pub async fn load_context(&self) -> Result<Option<serde_json::Value>, SessionError> {
        match tokio::fs::read_to_string(self.context_path()).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    warn!(session = %self.session_id, error = %err, "session context unreadable");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Store a generated report keyed by language.
    pub async fn save_report(&self, language: &str, content: &str) -> Result<(), SessionError> {
        let path = self.report_path(language);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub async fn get_report(&self, language: &str) -> Result<Option<String>, SessionError> {
        match tokio::fs::read_to_string(self.report_path(language)).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn available_report_languages(&self) -> Result<Vec<String>, SessionError> {
        let reports_dir = self.dir.join("reports");
        let mut languages = Vec::new();
        let mut entries = match tokio::fs::read_dir(&reports_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(languages),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(language) = name.to_str().and_then(|n| n.strip_suffix(".md")) {
                languages.push(language.to_string());
            }
        }
        languages.sort();
        Ok(languages)
    }

    /// Release the underlying store handle.
    pub async fn close(&self) -> Result<(), SessionError> {
        Ok(self.store.close().await?)
    }
}
