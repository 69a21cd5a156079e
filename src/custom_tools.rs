//! Custom tool catalog.
//!
//! Maps a tool name to a shell command template, persisted as a JSON object
//! (`{"name": "template"}`). Templates may reference arguments as `{key}`;
//! each placeholder becomes a required argument of the tool.

use crate::tools::{run_shell, Tool, ToolArgs, ToolError, ToolResult, ToolSpec};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());
static TOOL_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").unwrap());

/// Errors raised while loading or editing the catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid tool name '{0}': use letters, digits and underscores")]
    InvalidName(String),

    #[error("Command template for '{0}' is empty")]
    EmptyTemplate(String),

    #[error("Failed to parse custom tools file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent name -> command template mapping
#[derive(Debug, Clone)]
pub struct CustomToolCatalog {
    path: PathBuf,
    tools: BTreeMap<String, String>,
}

impl CustomToolCatalog {
    /// Empty catalog backed by `path` (nothing is read)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tools: BTreeMap::new(),
        }
    }

    /// Load the catalog at `path`; a missing file yields an empty catalog
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let mut catalog = Self::new(path);
        if catalog.path.exists() {
            let json = fs::read_to_string(&catalog.path)?;
            catalog.tools = serde_json::from_str(&json)?;
            debug!(path = ?catalog.path, count = catalog.tools.len(), "Loaded custom tools");
        }
        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add or replace a tool and persist the catalog
    pub fn add(&mut self, name: &str, template: &str) -> Result<(), CatalogError> {
        if !TOOL_NAME.is_match(name) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        if template.trim().is_empty() {
            return Err(CatalogError::EmptyTemplate(name.to_string()));
        }

        self.tools
            .insert(name.to_lowercase(), template.trim().to_string());
        self.save()?;
        info!(tool = %name, path = ?self.path, "Added custom tool");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.tools.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tools.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn save(&self) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.tools)?)?;
        Ok(())
    }
}

/// Names referenced as `{key}` in a template, in first-use order
pub fn template_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Tool adapter that fills a command template and runs it through the shell
pub struct ShellTemplateTool {
    name: String,
    template: String,
    timeout: Duration,
}

impl ShellTemplateTool {
    pub fn new(name: &str, template: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_lowercase(),
            template: template.to_string(),
            timeout,
        }
    }

    /// Substitute every placeholder; a missing argument is an error
    pub fn render(&self, args: &ToolArgs) -> Result<String, ToolError> {
        for key in template_placeholders(&self.template) {
            args.require(&key)?;
        }
        Ok(PLACEHOLDER
            .replace_all(&self.template, |caps: &regex::Captures| {
                args.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned())
    }
}

#[async_trait]
impl Tool for ShellTemplateTool {
    fn spec(&self) -> ToolSpec {
        let required = template_placeholders(&self.template);
        let usage = std::iter::once(format!("TOOL: {}", self.name))
            .chain(required.iter().map(|key| format!("{}=...", key)))
            .collect::<Vec<_>>()
            .join(" ");
        ToolSpec {
            name: self.name.clone(),
            description: format!("Custom: {}", self.template),
            usage,
            required,
            optional: Vec::new(),
        }
    }

    async fn run(&self, args: &ToolArgs) -> ToolResult {
        let command = self.render(args)?;
        run_shell(&command, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::COMMAND_TIMEOUT;
    use tempfile::TempDir;

    #[test]
    fn test_placeholders() {
        assert_eq!(
            template_placeholders("cp {src} {dst} && ls {dst}"),
            vec!["src", "dst"]
        );
        assert!(template_placeholders("cargo test").is_empty());
    }

    #[test]
    fn test_render_template() {
        let tool = ShellTemplateTool::new("greet", "echo hello {who}", COMMAND_TIMEOUT);
        let args = ToolArgs::parse("who=world");
        assert_eq!(tool.render(&args).unwrap(), "echo hello world");

        let err = tool.render(&ToolArgs::default()).unwrap_err();
        assert_eq!(err.to_string(), "who parameter required");
    }

    #[test]
    fn test_spec_lists_placeholders() {
        let tool = ShellTemplateTool::new("Deploy", "./deploy.sh {env}", COMMAND_TIMEOUT);
        let spec = tool.spec();
        assert_eq!(spec.name, "deploy");
        assert_eq!(spec.required, vec!["env"]);
        assert_eq!(spec.usage, "TOOL: deploy env=...");
    }

    #[tokio::test]
    async fn test_run_template() {
        let tool = ShellTemplateTool::new("greet", "echo hi {who}", COMMAND_TIMEOUT);
        let report = tool.run(&ToolArgs::parse("who=there")).await.unwrap();
        assert!(report.contains("hi there"));
    }

    #[test]
    fn test_catalog_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/custom_tools.json");

        let mut catalog = CustomToolCatalog::load(&path).unwrap();
        assert!(catalog.is_empty());

        catalog.add("Lint", "ruff check {path}").unwrap();
        assert!(path.exists());

        let reloaded = CustomToolCatalog::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("lint"), Some("ruff check {path}"));
        assert_eq!(reloaded.get("LINT"), Some("ruff check {path}"));
    }

    #[test]
    fn test_catalog_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let mut catalog = CustomToolCatalog::new(dir.path().join("tools.json"));

        assert!(matches!(
            catalog.add("bad name", "ls"),
            Err(CatalogError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.add("empty", "  "),
            Err(CatalogError::EmptyTemplate(_))
        ));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tools.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            CustomToolCatalog::load(&path),
            Err(CatalogError::Parse(_))
        ));
    }
}
