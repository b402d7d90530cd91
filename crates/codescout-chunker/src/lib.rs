//! Language-aware chunking of source files into retrievable units.
//!
//! A [`Chunker`] turns raw file text into an ordered sequence of [`Chunk`]s.
//! Three strategies exist, selected once per file extension:
//!
//! - **Declarative** (Python): parse with tree-sitter and walk top-level
//!   declarations, injecting imports and class context so each chunk reads
//!   on its own.
//! - **BraceDelimited** (C-family): a literal- and comment-aware tokenizer
//!   tracks brace nesting and cuts one chunk per top-level block.
//! - **Fallback** (everything else): fixed-size line windows.

mod braces;
mod chunk;
mod language;
mod python;
mod windows;

pub use chunk::{Chunk, ChunkKind, ChunkerConfig};
pub use language::ChunkingStrategy;

use anyhow::Result;
use tracing::debug;

/// Chunker version. Bump when chunk boundaries or synthesized context
/// change; persisted caches keyed on an older version are rebuilt.
pub const CHUNKER_VERSION: u32 = 2;

/// Splits file content into self-contained chunks.
///
/// Holds the tree-sitter parser for the declarative path, so chunking takes
/// `&mut self`. Construction fails only if the grammar cannot be loaded.
pub struct Chunker {
    config: ChunkerConfig,
    python: tree_sitter::Parser,
}

impl Chunker {
    pub fn new() -> Result<Self> {
        Self::with_config(ChunkerConfig::default())
    }

    pub fn with_config(config: ChunkerConfig) -> Result<Self> {
        let mut python = tree_sitter::Parser::new();
        python.set_language(&tree_sitter_python::LANGUAGE.into())?;
        Ok(Self { config, python })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk `content` as the file at `path`. Deterministic for a given
    /// input and configuration. Empty content yields no chunks.
    pub fn chunk(&mut self, content: &str, path: &str) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let strategy = ChunkingStrategy::for_path(path);
        let chunks = match strategy {
            ChunkingStrategy::Declarative => {
                python::chunk(&mut self.python, content, path, &self.config)
            }
            ChunkingStrategy::BraceDelimited => braces::chunk(content, path, &self.config),
            ChunkingStrategy::Fallback => windows::chunk(content, path, &self.config),
        };

        debug!(
            path,
            strategy = ?strategy,
            chunks = chunks.len(),
            "chunked file"
        );
        chunks
    }
}

/// Drop undersized declaration chunks, but only when the file also produced
/// at least one chunk that meets the minimum. A tiny file keeps its only
/// content.
pub(crate) fn apply_min_size_policy(chunks: Vec<Chunk>, min_chunk_size: usize) -> Vec<Chunk> {
    let has_large = chunks.iter().any(|c| c.content.len() >= min_chunk_size);
    if !has_large {
        return chunks;
    }
    chunks
        .into_iter()
        .filter(|c| c.content.len() >= min_chunk_size || c.kind == ChunkKind::GlobalContext)
        .collect()
}
