use std::path::Path;

/// How a file gets chunked, decided once from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkingStrategy {
    /// Grammar-backed parsing of top-level declarations (Python).
    Declarative,
    /// Brace-nesting heuristics for C-family languages.
    BraceDelimited,
    /// Fixed-size line windows for everything else.
    Fallback,
}

impl ChunkingStrategy {
    pub fn for_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "py" | "pyi" => ChunkingStrategy::Declarative,
            "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" | "java" | "js" | "jsx"
            | "mjs" | "cjs" | "ts" | "tsx" | "go" | "cs" | "php" | "rs" | "kt" | "scala"
            | "swift" => ChunkingStrategy::BraceDelimited,
            _ => ChunkingStrategy::Fallback,
        }
    }
}
