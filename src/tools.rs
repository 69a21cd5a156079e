//! Tool registry and execution for AiCode
//!
//! Built-in tools reachable through `TOOL:` invocations:
//! - read_file: Read file contents
//! - write_file: Write/create files
//! - execute_command: Run a shell command under a timeout
//! - analyze_code: Structural summary of Python source
//! - list_files: List directory entries
//!
//! Custom tools from the catalog (see `custom_tools`) are looked up before the
//! built-ins. Every failure is returned as a `ToolError`; nothing escapes a tool.

use crate::analyzer;
use crate::custom_tools::{CustomToolCatalog, ShellTemplateTool};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::process::Stdio;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Wall-clock limit for shell-backed tools
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// One `key=value` token; the value is double-quoted, single-quoted or bare
static ARG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([^\s=]+)=(?:"([^"]*)"|'([^']*)'|(\S*))"#).unwrap());

/// Outcome of a tool call. Both sides render as display text via `render_result`.
pub type ToolResult = Result<String, ToolError>;

/// Coarse classification of tool failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    MissingArgument,
    UnknownTool,
    Io,
    Timeout,
    CommandFailed,
}

/// Errors that can occur while executing a tool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0} parameter required")]
    MissingArgument(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{context}: {message}")]
    Io { context: String, message: String },

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    /// The process ran but exited non-zero; holds the full report
    #[error("{0}")]
    CommandFailed(String),
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ToolError::MissingArgument(_) => ToolErrorKind::MissingArgument,
            ToolError::UnknownTool(_) => ToolErrorKind::UnknownTool,
            ToolError::Io { .. } => ToolErrorKind::Io,
            ToolError::Timeout(_) => ToolErrorKind::Timeout,
            ToolError::CommandFailed(_) => ToolErrorKind::CommandFailed,
        }
    }

    fn io(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ToolError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Render any tool outcome as display text
pub fn render_result(result: &ToolResult) -> String {
    match result {
        Ok(output) => output.clone(),
        Err(e) => format!("Error: {}", e),
    }
}

/// Parsed `key=value` arguments of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolArgs {
    values: HashMap<String, String>,
}

impl ToolArgs {
    /// Parse raw argument text.
    ///
    /// Tokens are `key=value` pairs separated by whitespace. A value wrapped
    /// in double or single quotes keeps its spaces and loses its quotes, so
    /// `content="a b"` yields `a b`. Backslashes are kept as written. Tokens
    /// without `=` are ignored and a repeated key keeps its last value. An
    /// unterminated quote ends at the next whitespace with the quote
    /// characters trimmed.
    pub fn parse(raw: &str) -> Self {
        let mut args = Self::default();

        for caps in ARG_TOKEN.captures_iter(raw) {
            let key = &caps[1];
            let value = match (caps.get(2), caps.get(3), caps.get(4)) {
                (Some(quoted), _, _) | (None, Some(quoted), _) => quoted.as_str(),
                (None, None, Some(bare)) => bare.as_str().trim_matches(|c| c == '"' || c == '\''),
                (None, None, None) => "",
            };
            args.insert(key, value);
        }

        debug!(count = args.len(), "Parsed tool arguments");
        args
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// A required argument; absent and empty values are both missing
    pub fn require(&self, key: &str) -> Result<&str, ToolError> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ToolError::MissingArgument(key.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Static description of a tool, used for listings and the system prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl ToolSpec {
    fn new(name: &str, description: &str, usage: &str, required: &[&str], optional: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            usage: usage.to_string(),
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A named operation invokable through the tool-call protocol.
///
/// Implementations hold no per-call state, so one instance may serve any
/// number of sessions.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn run(&self, args: &ToolArgs) -> ToolResult;
}

/// Run a command through the platform shell and report exit code and output.
///
/// A zero exit is `Ok(report)`, a non-zero exit is `CommandFailed(report)`.
/// The child is killed if `timeout` elapses first.
pub async fn run_shell(command: &str, timeout: Duration) -> ToolResult {
    let (shell, flag) = if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    debug!(command = %command, "Running shell command");

    let result = tokio::time::timeout(
        timeout,
        tokio::process::Command::new(shell)
            .arg(flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            let report = format!(
                "Exit code: {}\nOutput: {}\nError: {}",
                exit_code,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            if output.status.success() {
                Ok(report)
            } else {
                Err(ToolError::CommandFailed(report))
            }
        }
        Ok(Err(e)) => Err(ToolError::io("Failed to execute command", e)),
        Err(_) => {
            warn!(command = %command, timeout_secs = timeout.as_secs(), "Command timed out");
            Err(ToolError::Timeout(timeout.as_secs()))
        }
    }
}

// === Built-in tools ===

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "read_file",
            "Read the contents of a file",
            "TOOL: read_file path=filename",
            &["path"],
            &[],
        )
    }

    async fn run(&self, args: &ToolArgs) -> ToolResult {
        let path = args.require("path")?;
        fs::read_to_string(path).map_err(|e| ToolError::io(format!("Failed to read file '{}'", path), e))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "write_file",
            "Create or overwrite a file",
            "TOOL: write_file path=filename content=\"code\"",
            &["path", "content"],
            &[],
        )
    }

    async fn run(&self, args: &ToolArgs) -> ToolResult {
        let path = args.require("path")?;
        // Empty content is a valid request for an empty file
        let content = args
            .get("content")
            .ok_or_else(|| ToolError::MissingArgument("content".to_string()))?;

        // Create parent directories if needed
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| ToolError::io("Failed to create directories", e))?;
            }
        }

        fs::write(path, content)
            .map_err(|e| ToolError::io(format!("Failed to write file '{}'", path), e))?;
        Ok(format!("File written: {} ({} bytes)", path, content.len()))
    }
}

pub struct ExecuteCommandTool {
    timeout: Duration,
}

impl ExecuteCommandTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "execute_command",
            "Run a shell command and report exit code, stdout and stderr",
            "TOOL: execute_command command=\"python script.py\"",
            &["command"],
            &[],
        )
    }

    async fn run(&self, args: &ToolArgs) -> ToolResult {
        let command = args.require("command")?;
        run_shell(command, self.timeout).await
    }
}

pub struct AnalyzeCodeTool;

#[async_trait]
impl Tool for AnalyzeCodeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "analyze_code",
            "Summarize functions, classes and imports of Python code",
            "TOOL: analyze_code code=\"def hello(): pass\"",
            &["code"],
            &[],
        )
    }

    async fn run(&self, args: &ToolArgs) -> ToolResult {
        let code = args.require("code")?;
        Ok(analyzer::analyze_code(code).to_string())
    }
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "list_files",
            "List directory contents",
            "TOOL: list_files path=. (optional)",
            &[],
            &["path"],
        )
    }

    async fn run(&self, args: &ToolArgs) -> ToolResult {
        let path = match args.get("path") {
            Some(p) if !p.is_empty() => p,
            _ => ".",
        };

        let entries = fs::read_dir(path)
            .map_err(|e| ToolError::io(format!("Failed to list directory '{}'", path), e))?;

        let mut items: Vec<String> = entries
            .flatten()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if is_dir {
                    format!("{}/", name)
                } else {
                    name
                }
            })
            .collect();
        items.sort();
        Ok(items.join("\n"))
    }
}

// === Registry ===

/// Name-indexed set of tools.
///
/// The five built-ins are fixed; custom shell-template tools may be added and
/// shadow a built-in of the same name.
pub struct ToolRegistry {
    builtins: Vec<Arc<dyn Tool>>,
    custom: BTreeMap<String, Arc<dyn Tool>>,
    command_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_command_timeout(COMMAND_TIMEOUT)
    }

    /// Registry whose shell-backed tools use `timeout` instead of the default
    pub fn with_command_timeout(timeout: Duration) -> Self {
        let builtins: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
            Arc::new(ExecuteCommandTool::new(timeout)),
            Arc::new(AnalyzeCodeTool),
            Arc::new(ListFilesTool),
        ];
        Self {
            builtins,
            custom: BTreeMap::new(),
            command_timeout: timeout,
        }
    }

    /// Register every entry of a custom-tool catalog
    pub fn with_catalog(mut self, catalog: &CustomToolCatalog) -> Self {
        self.load_catalog(catalog);
        self
    }

    /// Replace the custom tools with the entries of `catalog`
    pub fn load_catalog(&mut self, catalog: &CustomToolCatalog) {
        self.custom.clear();
        for (name, template) in catalog.entries() {
            self.register_template(name, template);
        }
    }

    /// Add (or replace) one shell-template tool
    pub fn register_template(&mut self, name: &str, template: &str) {
        let tool = ShellTemplateTool::new(name, template, self.command_timeout);
        debug!(tool = %name, "Registered custom tool");
        self.custom.insert(name.to_lowercase(), Arc::new(tool));
    }

    /// Resolve a tool by case-insensitive name, custom tools first
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let key = name.to_lowercase();
        if let Some(tool) = self.custom.get(&key) {
            return Some(Arc::clone(tool));
        }
        self.builtins
            .iter()
            .find(|tool| tool.spec().name == key)
            .cloned()
    }

    /// Specs of built-ins (fixed order) followed by custom tools (by name)
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.builtins
            .iter()
            .chain(self.custom.values())
            .map(|tool| tool.spec())
            .collect()
    }

    /// Parse `raw_args` once and run the named tool
    pub async fn execute(&self, name: &str, raw_args: &str) -> ToolResult {
        let Some(tool) = self.get(name) else {
            info!(tool = %name, "Unknown tool requested");
            return Err(ToolError::UnknownTool(name.to_string()));
        };

        let args = ToolArgs::parse(raw_args);
        info!(tool = %name, args = args.len(), "Executing tool");

        let result = tool.run(&args).await;
        if let Err(e) = &result {
            debug!(tool = %name, error = %e, "Tool reported failure");
        }
        result
    }
}
