//! Session storage: a durable document store with vector search, plus the
//! rebuildable lexical side (tokenizer, BM25, cache file).

pub mod bm25;
pub mod cache;
pub mod document;
pub mod sqlite;
pub mod store;
pub mod tokenize;

pub use bm25::Bm25Index;
pub use cache::{CACHE_FORMAT_VERSION, LexicalCache};
pub use document::{Document, DocumentMetadata, ScoredDocument};
pub use sqlite::{SqliteDocumentStore, SqliteStoreFactory};
pub use store::{DocumentStore, DocumentStoreFactory, StoreError};
pub use tokenize::{DEFAULT_TOKEN_SPLIT, Tokenizer};
