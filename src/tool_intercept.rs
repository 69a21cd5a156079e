//! Tool-call scanning for free text.
//!
//! Finds `TOOL: <name> key=value ...` invocations embedded in user input or
//! model replies. The scan is lexical and line-oriented: each line is parsed on
//! its own, there are no multi-line arguments and no nesting.

use crate::tools::{render_result, ToolRegistry, ToolResult};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// `TOOL:` (any case), an identifier, then the rest of the line.
/// Only horizontal whitespace is allowed between the parts, so an invocation
/// never borrows its name or arguments from the following line.
static TOOL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TOOL:[ \t]*(\w+)[ \t]*([^\n]*)").unwrap());

/// A tool invocation found in text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Tool name exactly as written; lookup is case-insensitive
    pub name: String,
    /// Unparsed argument text following the name
    pub raw_args: String,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, raw_args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_args: raw_args.into(),
        }
    }
}

/// Cheap check used to route input before a full scan
pub fn contains_tool_marker(text: &str) -> bool {
    text.to_uppercase().contains("TOOL:")
}

/// Extract every tool invocation in `text`, in order of appearance.
///
/// A `TOOL:` marker without a following identifier is skipped. An empty result
/// means the text should go through ordinary conversation handling.
pub fn parse_tool_calls(text: &str) -> Vec<ToolInvocation> {
    let invocations: Vec<ToolInvocation> = TOOL_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let raw_args = caps.get(2).map(|m| m.as_str().trim_end()).unwrap_or("");
            Some(ToolInvocation::new(name, raw_args))
        })
        .collect();

    if !invocations.is_empty() {
        debug!(count = invocations.len(), "Parsed tool invocations");
    }
    invocations
}

/// Execute invocations in order, pairing each with its result
pub async fn execute_invocations(
    registry: &ToolRegistry,
    invocations: &[ToolInvocation],
) -> Vec<(ToolInvocation, ToolResult)> {
    let mut results = Vec::with_capacity(invocations.len());
    for invocation in invocations {
        let result = registry.execute(&invocation.name, &invocation.raw_args).await;
        results.push((invocation.clone(), result));
    }
    results
}

/// Render executed invocations as plain text, one block per tool
pub fn format_tool_results(results: &[(ToolInvocation, ToolResult)]) -> String {
    results
        .iter()
        .map(|(invocation, result)| {
            format!("Tool result ({}):\n{}", invocation.name, render_result(result))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
