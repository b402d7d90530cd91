//! Heuristic chunking for brace-delimited languages (C family, Java, JS/TS,
//! Go, Rust, ...), used where no grammar is wired up.
//!
//! The scanner distinguishes string/char/template literals, line and block
//! comments, and preprocessor-style directives from structural braces; only
//! `{`/`}` affect nesting depth (parentheses and brackets are ignored so a
//! multi-line conditional is not mistaken for a block). Each top-level
//! `{...}` span becomes one chunk together with its signature: the text
//! between the previous statement terminator and the opening brace, which
//! correctly picks up multi-line signatures.

use crate::chunk::{Chunk, ChunkKind, ChunkerConfig};
use crate::{apply_min_size_policy, windows};

/// Control-flow keywords that look like calls in a signature scan.
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "sizeof", "function", "fn", "func", "new",
];

const TYPE_KEYWORDS: &[&str] = &[
    "class", "struct", "interface", "enum", "record", "trait", "impl", "type",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Single,
    Double,
    Template,
}

/// A top-level span produced by the scanner.
struct Scan {
    /// Byte ranges of `{...}` blocks, signature included.
    blocks: Vec<(usize, usize)>,
    /// Byte ranges of top-level non-block statements.
    statements: Vec<(usize, usize)>,
    /// Start of the unterminated tail, if any.
    tail: Option<usize>,
}

pub(crate) fn chunk(content: &str, path: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let scan = scan_top_level(content);

    if scan.blocks.is_empty() && scan.tail.is_none() {
        return windows::chunk(content, path, config);
    }

    let context = build_global_context(content, &scan.statements);
    let mut chunks = Vec::new();

    let header = if context.text.is_empty() {
        String::new()
    } else if context.text.len() < config.context_budget {
        context.text.clone()
    } else {
        chunks.push(Chunk {
            content: context.text.clone(),
            file_path: path.to_string(),
            kind: ChunkKind::GlobalContext,
            symbol_name: "globals".to_string(),
            start_line: context.start_line,
            enclosing_type: None,
        });
        String::new()
    };

    for &(start, end) in &scan.blocks {
        let trimmed_start = start + leading_ws(&content[start..end]);
        let text = &content[trimmed_start..end];
        if text.is_empty() {
            continue;
        }
        let start_line = line_of(content, trimmed_start);

        if text.len() > config.max_chunk_size {
            chunks.extend(windows::split_declaration(text, path, start_line, config));
            continue;
        }

        let signature = &text[..text.find('{').unwrap_or(text.len())];
        let (kind, symbol) = classify_signature(signature);
        let body = if header.is_empty() {
            text.to_string()
        } else {
            format!("{header}\n\n{text}")
        };
        chunks.push(Chunk {
            content: body,
            file_path: path.to_string(),
            kind,
            symbol_name: symbol,
            start_line,
            enclosing_type: None,
        });
    }

    if let Some(tail_start) = scan.tail {
        let trimmed_start = tail_start + leading_ws(&content[tail_start..]);
        let tail = content[trimmed_start..].trim_end();
        if tail.len() > config.min_chunk_size {
            chunks.push(Chunk {
                content: tail.to_string(),
                file_path: path.to_string(),
                kind: ChunkKind::TextBlock,
                symbol_name: "tail".to_string(),
                start_line: line_of(content, trimmed_start),
                enclosing_type: None,
            });
        }
    }

    if chunks.is_empty() {
        return windows::chunk(content, path, config);
    }

    chunks.sort_by_key(|c| c.start_line);
    apply_min_size_policy(chunks, config.min_chunk_size)
}

fn scan_top_level(content: &str) -> Scan {
    let bytes = content.as_bytes();
    let len = bytes.len();

    let mut state = State::Code;
    let mut depth = 0usize;
    let mut pending = 0usize;
    let mut sig_start: Option<usize> = None;
    let mut line_start = true;

    let mut blocks = Vec::new();
    let mut statements = Vec::new();

    let mut i = 0;
    while i < len {
        let c = bytes[i];
        match state {
            State::LineComment => {
                if c == b'\n' {
                    state = State::Code;
                    line_start = true;
                }
                i += 1;
            }
            State::BlockComment => {
                if c == b'*' && i + 1 < len && bytes[i + 1] == b'/' {
                    state = State::Code;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            State::Single => {
                if c == b'\\' {
                    i += 2;
                } else {
                    // A lifetime-style tick never closes; give up at EOL.
                    if c == b'\'' || c == b'\n' {
                        state = State::Code;
                    }
                    i += 1;
                }
            }
            State::Double => {
                if c == b'\\' {
                    i += 2;
                } else {
                    if c == b'"' {
                        state = State::Code;
                    }
                    i += 1;
                }
            }
            State::Template => {
                if c == b'\\' {
                    i += 2;
                } else {
                    if c == b'`' {
                        state = State::Code;
                    }
                    i += 1;
                }
            }
            State::Code => {
                if c == b'\n' {
                    line_start = true;
                    i += 1;
                    continue;
                }
                if c == b' ' || c == b'\t' || c == b'\r' {
                    i += 1;
                    continue;
                }

                // Preprocessor-style directive: a whole logical line whose
                // braces are not structural.
                if line_start && c == b'#' {
                    let start = i;
                    while i < len && !(bytes[i] == b'\n' && bytes[i - 1] != b'\\') {
                        i += 1;
                    }
                    if depth == 0 && sig_start.is_none() {
                        statements.push((start, i));
                        pending = i;
                    }
                    continue;
                }
                line_start = false;

                match c {
                    b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                        state = State::LineComment;
                        i += 2;
                    }
                    b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                        state = State::BlockComment;
                        i += 2;
                    }
                    b'"' => {
                        state = State::Double;
                        i += 1;
                    }
                    b'\'' => {
                        state = State::Single;
                        i += 1;
                    }
                    b'`' => {
                        state = State::Template;
                        i += 1;
                    }
                    b'{' => {
                        depth += 1;
                        if depth == 1 {
                            sig_start = Some(pending);
                        }
                        i += 1;
                    }
                    b'}' => {
                        depth = depth.saturating_sub(1);
                        i += 1;
                        if depth == 0 {
                            // Swallow a trailing `;` (struct/enum definitions).
                            let mut j = i;
                            while j < len && (bytes[j] == b' ' || bytes[j] == b'\t') {
                                j += 1;
                            }
                            if j < len && bytes[j] == b';' {
                                i = j + 1;
                            }
                            blocks.push((sig_start.take().unwrap_or(pending), i));
                            pending = i;
                        }
                    }
                    b';' => {
                        i += 1;
                        if depth == 0 && sig_start.is_none() {
                            statements.push((pending, i));
                            pending = i;
                        }
                    }
                    _ => i += 1,
                }
            }
        }
    }

    // An unbalanced file: emit the open block as-is.
    if let Some(start) = sig_start {
        blocks.push((start, len));
        pending = len;
    }

    let tail = if content[pending..].trim().is_empty() {
        None
    } else {
        Some(pending)
    };

    Scan {
        blocks,
        statements,
        tail,
    }
}

struct GlobalContext {
    text: String,
    start_line: usize,
}

/// Order top-level non-block text by a fixed priority: include/import
/// directives, then macro and type definitions, then other globals.
fn build_global_context(content: &str, statements: &[(usize, usize)]) -> GlobalContext {
    let mut ranked: Vec<(u8, usize, &str)> = Vec::new();
    for &(start, end) in statements {
        let text = content[start..end].trim();
        if text.is_empty() {
            continue;
        }
        let priority = if text.starts_with("#include")
            || text.starts_with("import")
            || text.starts_with("using ")
            || text.starts_with("package ")
            || text.starts_with("extern crate")
            || text.starts_with("mod ")
        {
            0
        } else if text.starts_with('#') || text.starts_with("typedef") || text.starts_with("type ")
        {
            1
        } else {
            2
        };
        ranked.push((priority, start, text));
    }
    ranked.sort_by_key(|&(priority, start, _)| (priority, start));

    let start_line = ranked
        .iter()
        .map(|&(_, start, _)| line_of(content, start))
        .min()
        .unwrap_or(1);
    let text = ranked
        .iter()
        .map(|&(_, _, text)| text)
        .collect::<Vec<_>>()
        .join("\n");

    GlobalContext { text, start_line }
}

/// Name and kind from a block signature. The symbol is the first identifier
/// immediately followed by `(` that is not a control-flow keyword; type
/// declarations are scanned separately for the `class Foo` shape.
fn classify_signature(signature: &str) -> (ChunkKind, String) {
    let words = split_identifiers(signature);

    for window in words.windows(2) {
        if TYPE_KEYWORDS.contains(&window[0].text) {
            return (ChunkKind::Class, window[1].text.to_string());
        }
    }

    for word in &words {
        if CONTROL_KEYWORDS.contains(&word.text) {
            continue;
        }
        let rest = signature[word.end..].trim_start();
        if rest.starts_with('(') {
            return (ChunkKind::Function, word.text.to_string());
        }
    }

    // Arrow functions and initializers: `const handler = ...`.
    for window in words.windows(2) {
        if matches!(window[0].text, "const" | "let" | "var" | "val") {
            return (ChunkKind::Function, window[1].text.to_string());
        }
    }

    (ChunkKind::Function, "block".to_string())
}

struct Word<'a> {
    text: &'a str,
    end: usize,
}

fn split_identifiers(signature: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let bytes = signature.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            words.push(Word {
                text: &signature[start..i],
                end: i,
            });
        } else {
            i += 1;
        }
    }
    words
}

fn leading_ws(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}
