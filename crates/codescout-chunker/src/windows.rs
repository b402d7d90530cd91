//! Line-window fallback chunking.

use crate::chunk::{Chunk, ChunkKind, ChunkerConfig};

/// Split `content` into fixed-height line windows, one `TextBlock` chunk per
/// window. Used for unrecognized file types and as the recovery path when
/// parsing fails.
pub(crate) fn chunk(content: &str, path: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + config.window_lines).min(lines.len());
        chunks.push(Chunk {
            content: lines[start..end].join("\n"),
            file_path: path.to_string(),
            kind: ChunkKind::TextBlock,
            symbol_name: format!("chunk_{start}"),
            start_line: start + 1,
            enclosing_type: None,
        });
        start = end;
    }
    chunks
}

/// Window-split a single oversized declaration. Keeps the declaration's own
/// starting line so windows still map back into the file.
pub(crate) fn split_declaration(
    text: &str,
    path: &str,
    first_line: usize,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + config.window_lines).min(lines.len());
        chunks.push(Chunk {
            content: lines[start..end].join("\n"),
            file_path: path.to_string(),
            kind: ChunkKind::TextBlock,
            symbol_name: format!("chunk_{}", first_line + start - 1),
            start_line: first_line + start,
            enclosing_type: None,
        });
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig {
            window_lines: 10,
            ..ChunkerConfig::default()
        }
    }

    #[test]
    fn windows_cover_all_lines_without_overlap() {
        let content = (1..=25).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunk(&content, "notes.md", &config());

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].start_line, 11);
        assert_eq!(chunks[2].start_line, 21);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::TextBlock));

        let rejoined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rejoined, content);
    }

    #[test]
    fn short_file_is_one_window() {
        let chunks = chunk("a\nb\nc", "x.txt", &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "a\nb\nc");
    }
}
