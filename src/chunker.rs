//! Code chunker.
//!
//! Splits one file's text into embeddable chunks. Extensions with
//! structural parsing support (`ts`, `tsx`, `js`, `jsx`) are parsed with
//! tree-sitter and chunked at declaration boundaries; everything else is
//! split into fixed line windows. Pure and deterministic: no I/O.
//!
//! Structural chunking emits one chunk per function declaration, class
//! declaration, and method definition. Anonymous arrow/function
//! expressions are not emitted bare: the walker climbs the ancestor chain
//! to the nearest enclosing variable declaration or export statement so
//! the naming context (`const foo = () => ...`) lands in the chunk; the
//! climb stops at a block or the source root, in which case the bare
//! expression is emitted after all. Chunks are deduplicated by exact byte
//! range within the file.

use std::collections::HashSet;

use tree_sitter::{Language, Node, Parser};

/// A contiguous line-range slice of one file, before embedding.
///
/// Lines are 1-indexed and the end is inclusive, in both the structural
/// and the window branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Node kinds that produce a chunk directly.
const DECLARATION_KINDS: &[&str] = &[
    "function_declaration",
    "class_declaration",
    "method_definition",
];

/// Node kinds that trigger the enclosing-declaration climb.
const EXPRESSION_KINDS: &[&str] = &["arrow_function", "function_expression"];

/// Container kinds that terminate the climb by being emitted.
const ENCLOSING_DECLARATION_KINDS: &[&str] =
    &["lexical_declaration", "variable_declaration", "export_statement"];

/// Container kinds that terminate the climb as a boundary.
const BOUNDARY_KINDS: &[&str] = &["statement_block", "class_body", "program"];

#[derive(Debug, Clone)]
pub struct Chunker {
    /// Window size for extensions without structural support.
    pub window_lines: usize,
    /// Window size when a parseable file yields no declarations.
    pub fallback_window_lines: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            window_lines: 50,
            fallback_window_lines: 100,
        }
    }
}

impl Chunker {
    pub fn new(window_lines: usize, fallback_window_lines: usize) -> Self {
        Self {
            window_lines,
            fallback_window_lines,
        }
    }

    /// Split `source` into chunks, dispatching on `file_name`'s extension.
    pub fn chunk(&self, source: &str, file_name: &str) -> Vec<Chunk> {
        match language_for(file_name) {
            Some(language) => self.chunk_structural(source, &language),
            None => chunk_windows(source, self.window_lines),
        }
    }

    fn chunk_structural(&self, source: &str, language: &Language) -> Vec<Chunk> {
        let mut parser = Parser::new();
        let tree = parser
            .set_language(language)
            .ok()
            .and_then(|_| parser.parse(source, None));

        let mut chunks = Vec::new();
        if let Some(tree) = tree {
            let mut seen_ranges = HashSet::new();
            visit(tree.root_node(), source, &mut seen_ranges, &mut chunks);
        }

        // Config-only or declaration-free files still need at least one chunk.
        if chunks.is_empty() && !source.trim().is_empty() {
            return chunk_windows(source, self.fallback_window_lines);
        }

        chunks
    }
}

fn language_for(file_name: &str) -> Option<Language> {
    let extension = file_name.rsplit('.').next()?.to_lowercase();
    match extension.as_str() {
        "ts" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "js" | "jsx" => Some(tree_sitter_javascript::LANGUAGE.into()),
        _ => None,
    }
}

fn visit(
    node: Node<'_>,
    source: &str,
    seen_ranges: &mut HashSet<(usize, usize)>,
    chunks: &mut Vec<Chunk>,
) {
    let kind = node.kind();

    if DECLARATION_KINDS.contains(&kind) {
        emit(node, source, seen_ranges, chunks);
    } else if EXPRESSION_KINDS.contains(&kind) {
        emit(enclosing_declaration(node), source, seen_ranges, chunks);
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            visit(child, source, seen_ranges, chunks);
        }
    }
}

/// Bounded ancestor-chain search: return the nearest enclosing declaration
/// statement, or `node` itself when a block or the source root is reached
/// first.
fn enclosing_declaration(node: Node<'_>) -> Node<'_> {
    let mut current = node;
    while let Some(parent) = current.parent() {
        let kind = parent.kind();
        if ENCLOSING_DECLARATION_KINDS.contains(&kind) {
            return parent;
        }
        if BOUNDARY_KINDS.contains(&kind) {
            return node;
        }
        current = parent;
    }
    node
}

fn emit(
    node: Node<'_>,
    source: &str,
    seen_ranges: &mut HashSet<(usize, usize)>,
    chunks: &mut Vec<Chunk>,
) {
    let range = (node.start_byte(), node.end_byte());
    // The same range can be reached twice, e.g. a declaration and its
    // nested expression walked separately.
    if !seen_ranges.insert(range) {
        return;
    }

    chunks.push(Chunk {
        content: source[range.0..range.1].to_string(),
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    });
}

/// Split text into fixed windows of `window_lines` lines; the final window
/// may be shorter. Line ranges are contiguous with no gaps or overlaps.
fn chunk_windows(source: &str, window_lines: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut chunks = Vec::new();

    let mut start = 0;
    while start < lines.len() {
        let end = (start + window_lines).min(lines.len());
        chunks.push(Chunk {
            content: lines[start..end].join("\n"),
            start_line: start + 1,
            end_line: end,
        });
        start = end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::default()
    }

    #[test]
    fn window_ranges_are_contiguous() {
        let source = (1..=120).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunk_windows(&source, 50);

        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 50));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (51, 100));
        assert_eq!((chunks[2].start_line, chunks[2].end_line), (101, 120));

        // No gaps, no overlaps, last end equals the line count.
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn short_file_is_one_window() {
        let chunks = chunk_windows("a\nb\nc", 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
        assert_eq!(chunks[0].content, "a\nb\nc");
    }

    #[test]
    fn non_structural_extension_uses_windows() {
        let source = (1..=60).map(|i| format!("row {i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunker().chunk(&source, "data.py");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end_line, 50);
        assert_eq!(chunks[1].end_line, 60);
    }

    #[test]
    fn function_declaration_is_a_chunk() {
        let source = "function add(a, b) {\n  return a + b;\n}\n";
        let chunks = chunker().chunk(source, "math.ts");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert!(chunks[0].content.starts_with("function add"));
    }

    #[test]
    fn arrow_chunk_starts_at_const_keyword() {
        let source = "// header\nconst handler = () => {\n  return 42;\n};\n";
        let chunks = chunker().chunk(source, "handler.ts");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 2);
        assert!(chunks[0].content.starts_with("const handler"));
    }

    #[test]
    fn exported_arrow_keeps_naming_context() {
        let source = "export const run = async () => {\n  return 1;\n};\n";
        let chunks = chunker().chunk(source, "run.ts");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.starts_with("const run") || chunks[0].content.starts_with("export"));
    }

    #[test]
    fn class_and_method_both_emitted() {
        let source = "class Greeter {\n  greet() {\n    return \"hi\";\n  }\n}\n";
        let chunks = chunker().chunk(source, "greeter.ts");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().any(|c| c.content.starts_with("class Greeter")));
        assert!(chunks.iter().any(|c| c.content.starts_with("greet()")));
    }

    #[test]
    fn duplicate_ranges_are_deduplicated() {
        // Two arrows under one declaration both climb to the same statement.
        let source = "const a = () => 1, b = () => 2;\n";
        let chunks = chunker().chunk(source, "pair.js");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.starts_with("const a"));
    }

    #[test]
    fn callback_arrow_emits_bare_expression() {
        // The expression statement is not a declaration, so the climb hits
        // the source root and falls back to the arrow itself.
        let source = "items.forEach((x) => {\n  use(x);\n});\n";
        let chunks = chunker().chunk(source, "loop.js");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.starts_with("(x) =>"));
    }

    #[test]
    fn declaration_free_file_falls_back_to_windows() {
        let source = (1..=150)
            .map(|i| format!("export const N{i} = {i};"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker().chunk(&source, "constants.ts");
        // 150 lines, fallback window of 100.
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 100));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (101, 150));
    }

    #[test]
    fn chunking_is_deterministic() {
        let source = "function f() {}\nconst g = () => {};\nclass C { m() {} }\n";
        let a = chunker().chunk(source, "all.ts");
        let b = chunker().chunk(source, "all.ts");
        assert_eq!(a, b);
    }
}
