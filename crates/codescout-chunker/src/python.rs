//! Declaration-aware chunking for Python via tree-sitter.
//!
//! Top-level classes and functions become chunks; imports are prepended to
//! every declaration chunk as a context header. Other top-level statements
//! ride along in the header while they fit the context budget, otherwise
//! they become a standalone `GlobalContext` chunk. A class too large for one
//! chunk is split per method, each method prefixed with a synthesized class
//! stub (signature plus class-level field assignments) so it reads on its
//! own.

use crate::chunk::{Chunk, ChunkKind, ChunkerConfig};
use crate::{apply_min_size_policy, windows};
use tree_sitter::{Node, Parser};

pub(crate) fn chunk(
    parser: &mut Parser,
    content: &str,
    path: &str,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    let tree = match parser.parse(content, None) {
        Some(tree) => tree,
        None => return windows::chunk(content, path, config),
    };
    let root = tree.root_node();
    if root.has_error() {
        // Unparseable input: recover with line windows, never an error.
        return windows::chunk(content, path, config);
    }

    let mut imports: Vec<Node> = Vec::new();
    let mut globals: Vec<Node> = Vec::new();
    let mut decls: Vec<Node> = Vec::new();

    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        match node.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                imports.push(node)
            }
            "class_definition" | "function_definition" => decls.push(node),
            "decorated_definition" => match definition_of(node).map(|d| d.kind()) {
                Some("class_definition") | Some("function_definition") => decls.push(node),
                _ => globals.push(node),
            },
            "comment" => {}
            _ => globals.push(node),
        }
    }

    if decls.is_empty() {
        // Pure script: one chunk, unless the whole file is far past the
        // bound, in which case line windows keep chunks retrievable.
        if content.len() > config.max_chunk_size * 3 / 2 {
            return windows::chunk(content, path, config);
        }
        return vec![Chunk {
            content: content.to_string(),
            file_path: path.to_string(),
            kind: ChunkKind::Script,
            symbol_name: "script".to_string(),
            start_line: 1,
            enclosing_type: None,
        }];
    }

    let imports_text = join_nodes(&imports, content);
    let globals_text = join_nodes(&globals, content);

    let mut header = imports_text.clone();
    let mut chunks = Vec::new();

    if !globals_text.is_empty() {
        if globals_text.len() < config.context_budget {
            if header.is_empty() {
                header = globals_text.clone();
            } else {
                header.push_str("\n");
                header.push_str(&globals_text);
            }
        } else {
            // Too big to inject everywhere; keep it retrievable on its own.
            chunks.push(Chunk {
                content: globals_text.clone(),
                file_path: path.to_string(),
                kind: ChunkKind::GlobalContext,
                symbol_name: "globals".to_string(),
                start_line: globals[0].start_position().row + 1,
                enclosing_type: None,
            });
        }
    }

    for decl in &decls {
        let inner = definition_of(*decl).unwrap_or(*decl);
        let text = node_text(*decl, content);
        match inner.kind() {
            "class_definition" => {
                if text.len() <= config.max_chunk_size {
                    chunks.push(make_chunk(
                        with_header(&header, text),
                        path,
                        ChunkKind::Class,
                        name_of(inner, content),
                        inner.start_position().row + 1,
                        None,
                    ));
                } else {
                    chunks.extend(split_class(inner, content, path, &header, config));
                }
            }
            _ => {
                if text.len() > config.max_chunk_size {
                    chunks.extend(windows::split_declaration(
                        text,
                        path,
                        decl.start_position().row + 1,
                        config,
                    ));
                } else {
                    chunks.push(make_chunk(
                        with_header(&header, text),
                        path,
                        ChunkKind::Function,
                        name_of(inner, content),
                        inner.start_position().row + 1,
                        None,
                    ));
                }
            }
        }
    }

    chunks.sort_by_key(|c| c.start_line);
    apply_min_size_policy(chunks, config.min_chunk_size)
}

/// One chunk per method, each carrying a synthesized class stub: the class
/// signature, its class-level field assignments, and an elision marker.
fn split_class(
    class_node: Node,
    content: &str,
    path: &str,
    header: &str,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    let class_name = name_of(class_node, content);
    let body = match class_node.child_by_field_name("body") {
        Some(body) => body,
        None => return Vec::new(),
    };

    let signature = content[class_node.start_byte()..body.start_byte()].trim_end();
    let mut stub = String::from(signature);
    stub.push('\n');

    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        if child.kind() == "expression_statement" {
            let first = child.named_child(0);
            let is_field = matches!(first.map(|n| n.kind()), Some("assignment") | Some("string"));
            if is_field {
                for line in node_text(child, content).lines() {
                    stub.push_str("    ");
                    stub.push_str(line);
                    stub.push('\n');
                }
            }
        }
    }
    stub.push_str("    # ...\n");

    let mut chunks = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        let inner = if child.kind() == "decorated_definition" {
            match definition_of(child) {
                Some(def) => def,
                None => continue,
            }
        } else {
            child
        };
        if inner.kind() != "function_definition" {
            continue;
        }

        let method_text = node_text(child, content);
        if method_text.len() > config.max_chunk_size {
            chunks.extend(windows::split_declaration(
                method_text,
                path,
                child.start_position().row + 1,
                config,
            ));
            continue;
        }

        let mut body_text = stub.clone();
        for line in method_text.lines() {
            body_text.push_str("    ");
            body_text.push_str(line);
            body_text.push('\n');
        }

        chunks.push(make_chunk(
            with_header(header, body_text.trim_end()),
            path,
            ChunkKind::Method,
            name_of(inner, content),
            inner.start_position().row + 1,
            Some(class_name.clone()),
        ));
    }
    chunks
}

fn definition_of(node: Node) -> Option<Node> {
    node.child_by_field_name("definition")
}

fn name_of(node: Node, content: &str) -> String {
    node.child_by_field_name("name")
        .map(|n| node_text(n, content).to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn node_text<'a>(node: Node, content: &'a str) -> &'a str {
    &content[node.start_byte()..node.end_byte()]
}

fn join_nodes(nodes: &[Node], content: &str) -> String {
    nodes
        .iter()
        .map(|n| node_text(*n, content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn with_header(header: &str, text: &str) -> String {
    if header.is_empty() {
        text.to_string()
    } else {
        format!("{header}\n\n{text}")
    }
}

fn make_chunk(
    content: String,
    path: &str,
    kind: ChunkKind,
    symbol_name: String,
    start_line: usize,
    enclosing_type: Option<String>,
) -> Chunk {
    Chunk {
        content,
        file_path: path.to_string(),
        kind,
        symbol_name,
        start_line,
        enclosing_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_source(content: &str) -> Vec<Chunk> {
        chunk_with(content, ChunkerConfig::default())
    }

    fn chunk_with(content: &str, config: ChunkerConfig) -> Vec<Chunk> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        chunk(&mut parser, content, "app/sample.py", &config)
    }

    const TWO_METHOD_CLASS: &str = "\
import os
import sys


class Worker:
    retries = 3
    backoff = 1.5

    def run(self, job):
        for attempt in range(self.retries):
            result = self.execute(job)
            if result is not None:
                return result
            time.sleep(self.backoff * attempt)
        raise RuntimeError('job failed: ' + str(job))

    def execute(self, job):
        handler = self.handlers.get(job.kind)
        if handler is None:
            return None
        try:
            return handler(job.payload)
        except ValueError:
            return None


def helper(value):
    cleaned = value.strip().lower()
    if not cleaned:
        return None
    return cleaned.replace('-', '_')
";

    #[test]
    fn small_class_is_one_chunk_with_import_header() {
        let chunks = chunk_source(TWO_METHOD_CLASS);
        let class_chunk = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Class)
            .expect("class chunk");
        assert_eq!(class_chunk.symbol_name, "Worker");
        assert!(class_chunk.content.starts_with("import os\nimport sys"));
        assert!(class_chunk.content.contains("def execute"));
        assert_eq!(class_chunk.start_line, 5);
    }

    #[test]
    fn top_level_function_gets_own_chunk() {
        let chunks = chunk_source(TWO_METHOD_CLASS);
        let func = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Function)
            .expect("function chunk");
        assert_eq!(func.symbol_name, "helper");
        assert!(func.content.contains("def helper(value):"));
        assert!(func.content.starts_with("import os"));
    }

    #[test]
    fn oversized_class_splits_per_method_with_shared_stub() {
        // Force the split by shrinking the bound below the class size.
        let config = ChunkerConfig {
            max_chunk_size: 300,
            min_chunk_size: 10,
            ..ChunkerConfig::default()
        };
        let chunks = chunk_with(TWO_METHOD_CLASS, config);

        let methods: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Method)
            .collect();
        assert_eq!(methods.len(), 2);

        for m in &methods {
            assert_eq!(m.enclosing_type.as_deref(), Some("Worker"));
            assert!(m.content.contains("class Worker:"));
            assert!(m.content.contains("retries = 3"));
            assert!(m.content.contains("backoff = 1.5"));
        }
        assert_eq!(methods[0].symbol_name, "run");
        assert_eq!(methods[0].start_line, 9);
        assert_eq!(methods[1].symbol_name, "execute");
        assert_eq!(methods[1].start_line, 17);

        // Both methods share the same synthesized class header.
        let header_of = |c: &Chunk| {
            let at = c.content.find("class Worker:").unwrap();
            let end = c.content.find("# ...").unwrap();
            c.content[at..end].to_string()
        };
        assert_eq!(header_of(methods[0]), header_of(methods[1]));
    }

    #[test]
    fn pure_script_is_single_chunk() {
        let script = "import json\nvalues = [1, 2, 3]\nprint(json.dumps(values))\n";
        let chunks = chunk_source(script);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Script);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn huge_script_falls_back_to_windows() {
        let mut script = String::new();
        for i in 0..400 {
            script.push_str(&format!("value_{i} = {i}\n"));
        }
        let config = ChunkerConfig {
            max_chunk_size: 2000,
            ..ChunkerConfig::default()
        };
        let chunks = chunk_with(&script, config);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::TextBlock));
    }

    #[test]
    fn syntax_error_falls_back_to_windows() {
        let broken = "def broken(:\n    pass\n";
        let chunks = chunk_source(broken);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::TextBlock));
    }

    #[test]
    fn oversized_globals_become_global_context_chunk() {
        let mut source = String::from("import os\n\n");
        // A big top-level table, well past the context budget.
        source.push_str("TABLE = {\n");
        for i in 0..60 {
            source.push_str(&format!("    'key_{i}': {i},\n"));
        }
        source.push_str("}\n\n");
        source.push_str("def lookup(key):\n    return TABLE.get(key)\n");

        let chunks = chunk_source(&source);
        let global = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::GlobalContext)
            .expect("global context chunk");
        assert!(global.content.contains("TABLE"));

        let func = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Function)
            .expect("function chunk");
        // Globals stayed out of the header; imports did not.
        assert!(func.content.starts_with("import os"));
        assert!(!func.content.contains("'key_0'"));
    }

    #[test]
    fn declaration_text_survives_chunking_exactly_once() {
        let chunks = chunk_source(TWO_METHOD_CLASS);
        let all: String = chunks.iter().map(|c| c.content.as_str()).collect();
        // Each declaration appears exactly once across all chunks.
        assert_eq!(all.matches("class Worker:").count(), 1);
        assert_eq!(all.matches("def run(self, job):").count(), 1);
        assert_eq!(all.matches("def helper(value):").count(), 1);
    }
}
