//! Base system prompt for the assistant persona.
//!
//! The prompt is tuned for small local models: short, with the tool syntax
//! shown by example. The tool list is generated from the registry so custom
//! tools are advertised alongside the built-ins.

use crate::tools::ToolSpec;

const PERSONA: &str = "You are AiCode, a helpful coding assistant optimized for small local models.
Be concise, practical, and focus on actionable solutions.";

const TOOL_GUIDANCE: &str = "When the user asks for file operations, commands or code analysis, suggest a tool call on its own line, for example:";

const CLOSING: &str = "Keep responses under 200 words unless explaining complex concepts.";

/// Base system prompt advertising `tools`
pub fn build_system_prompt(tools: &[ToolSpec]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(PERSONA);

    if !tools.is_empty() {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        prompt.push_str("\n\nAvailable tools: ");
        prompt.push_str(&names.join(", "));

        prompt.push_str("\n\n");
        prompt.push_str(TOOL_GUIDANCE);
        for tool in tools {
            prompt.push('\n');
            prompt.push_str(&tool.usage);
        }
    }

    prompt.push_str("\n\n");
    prompt.push_str(CLOSING);
    prompt
}
