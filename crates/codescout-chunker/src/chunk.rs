use serde::{Deserialize, Serialize};

/// What a chunk represents in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Class,
    Function,
    Method,
    Script,
    GlobalContext,
    TextBlock,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Script => "script",
            ChunkKind::GlobalContext => "global_context",
            ChunkKind::TextBlock => "text_block",
        }
    }
}

/// A retrievable, self-contained span of source text with metadata.
///
/// `content` may be prefixed with a synthesized context header (imports,
/// enclosing class signature and fields) so the chunk is interpretable
/// without the rest of its file. `start_line` is 1-based and points at the
/// declaration itself, not the injected header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub symbol_name: String,
    pub start_line: usize,
    /// Class name, when the chunk is a method split out of an oversized class.
    pub enclosing_type: Option<String>,
}

/// Chunking bounds, in bytes of chunk content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Declarations below this size are dropped unless they are the only
    /// content the file produced.
    pub min_chunk_size: usize,
    /// Declarations above this size are split (per-method for classes,
    /// line windows as a last resort).
    pub max_chunk_size: usize,
    /// Non-import globals are injected as a context header only while their
    /// combined size stays under this budget; otherwise they become a
    /// standalone `GlobalContext` chunk.
    pub context_budget: usize,
    /// Window height for the line-window fallback.
    pub window_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 50,
            max_chunk_size: 2000,
            context_budget: 600,
            window_lines: 100,
        }
    }
}
