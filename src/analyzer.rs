//! Static code analyzer for Python source.
//!
//! A snapshot is first checked against the Python 3 grammar with
//! `rustpython-parser`, which rejects what CPython rejects (bad indentation,
//! Python 2 statements). Valid source is then walked with the tree-sitter
//! Python grammar to collect function, class and import names in document
//! order. Used by the `analyze_code` tool and the shell's `/analyze` and
//! `/debug` commands.
//!
//! `line_count` is the number of whitespace-delimited tokens in the raw text,
//! not the number of newlines. That is how the metric has always been reported
//! and it is kept as-is.

use rustpython_parser::{ast, Parse};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;
use tree_sitter::{Node, Parser};

/// Maximum number of import names kept in an analysis
pub const MAX_IMPORTS: usize = 5;

/// Structural summary of a source snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeAnalysis {
    /// Whitespace-token count of the raw text
    pub line_count: usize,
    pub function_names: Vec<String>,
    pub class_names: Vec<String>,
    /// First `MAX_IMPORTS` import targets; `from`-imports read `from <module>`
    pub import_names: Vec<String>,
    /// Parser diagnostic when the text is not valid Python
    pub syntax_error: Option<String>,
}

impl CodeAnalysis {
    fn syntax_failure(message: String) -> Self {
        Self {
            syntax_error: Some(message),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.syntax_error.is_none()
    }
}

impl fmt::Display for CodeAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.syntax_error {
            return write!(f, "Syntax Error: {}", err);
        }

        write!(f, "Lines of code: {}", self.line_count)?;
        if !self.function_names.is_empty() {
            write!(f, "\nFunctions: {}", self.function_names.join(", "))?;
        }
        if !self.class_names.is_empty() {
            write!(f, "\nClasses: {}", self.class_names.join(", "))?;
        }
        if !self.import_names.is_empty() {
            write!(f, "\nImports: {}", self.import_names.join(", "))?;
        }
        Ok(())
    }
}

/// Analyze a Python source snapshot.
///
/// Never fails: a parse error is reported through `syntax_error` with every
/// name list left empty.
pub fn analyze_code(source: &str) -> CodeAnalysis {
    if let Err(err) = ast::Suite::parse(source, "<input>") {
        let (line, column) = line_column(source, u32::from(err.offset) as usize);
        let message = format!("{} at line {}, column {}", err.error, line, column);
        debug!(error = %message, "Source failed to parse");
        return CodeAnalysis::syntax_failure(message);
    }

    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        return CodeAnalysis::syntax_failure(format!("Python grammar unavailable: {}", e));
    }

    let Some(tree) = parser.parse(source, None) else {
        return CodeAnalysis::syntax_failure("parser produced no syntax tree".to_string());
    };
    let root = tree.root_node();

    let mut analysis = CodeAnalysis {
        line_count: source.split_whitespace().count(),
        ..Default::default()
    };
    let mut imports = Vec::new();
    collect_names(root, source.as_bytes(), &mut analysis, &mut imports);
    imports.truncate(MAX_IMPORTS);
    analysis.import_names = imports;

    analysis
}

/// Read a file and analyze its contents
pub fn analyze_file(path: impl AsRef<Path>) -> std::io::Result<CodeAnalysis> {
    let content = fs::read_to_string(path.as_ref())?;
    Ok(analyze_code(&content))
}

/// Pre-order walk, so names come out in document order.
fn collect_names(node: Node, source: &[u8], analysis: &mut CodeAnalysis, imports: &mut Vec<String>) {
    match node.kind() {
        "function_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                analysis.function_names.push(name);
            }
        }
        "class_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                analysis.class_names.push(name);
            }
        }
        "import_statement" => {
            let mut cursor = node.walk();
            for target in node.children_by_field_name("name", &mut cursor) {
                // `import a.b as c` records the module, not the alias
                let module = if target.kind() == "aliased_import" {
                    field_text(target, "name", source)
                } else {
                    node_text(target, source)
                };
                if let Some(module) = module {
                    imports.push(module);
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = field_text(node, "module_name", source) {
                imports.push(format!("from {}", module));
            }
        }
        "future_import_statement" => {
            imports.push("from __future__".to_string());
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_names(child, source, analysis, imports);
    }
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|child| node_text(child, source))
}

fn node_text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(|s| s.to_string())
}

/// 1-based line and column of a byte offset, clamped to the source.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let mut end = offset.min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    let before = &source[..end];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, before[line_start..].chars().count() + 1)
}
