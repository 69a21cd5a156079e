//! Configuration loader.
//!
//! Loads configuration from:
//! 1. Default values
//! 2. `.aicode/config.yaml` in project directory
//! 3. `~/.aicode/config.yaml` in home directory
//! 4. Environment variables with `AICODE_` prefix (`__` between levels)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Endpoint of the bundled `default` and `ollama` profiles
pub const OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1/chat/completions";
/// Endpoint of the bundled `lmstudio` profile
pub const LMSTUDIO_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";
/// Name of the profile used when nothing else matches
pub const DEFAULT_PROFILE: &str = "default";

const SECRET_MARKERS: [&str; 3] = ["key", "token", "password"];

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub models: HashMap<String, ModelProfile>,
    #[serde(default)]
    pub settings: GenerationSettings,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Interactive shell behaviour
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShellConfig {
    #[serde(default = "default_model_name")]
    pub default_model: String,
    /// Execute `TOOL:` lines that appear in model replies
    #[serde(default)]
    pub run_model_tool_calls: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_model: default_model_name(),
            run_model_tool_calls: false,
        }
    }
}

fn default_model_name() -> String {
    DEFAULT_PROFILE.to_string()
}

/// A named completion endpoint
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelProfile {
    pub endpoint: String,
    /// Value sent as `model` in the request body
    #[serde(default = "default_request_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ModelProfile {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: default_request_model(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            timeout_seconds: None,
        }
    }
}

fn default_request_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// Generation parameters shared by every profile unless overridden
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Files the shell reads and writes, relative to the working directory
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_context_file")]
    pub context_file: PathBuf,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    #[serde(default = "default_custom_tools_file")]
    pub custom_tools_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            context_file: default_context_file(),
            sessions_dir: default_sessions_dir(),
            custom_tools_file: default_custom_tools_file(),
        }
    }
}

fn default_context_file() -> PathBuf {
    PathBuf::from("aicode.md")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from(".aicode/sessions")
}

fn default_custom_tools_file() -> PathBuf {
    PathBuf::from(".aicode/custom_tools.json")
}

/// Effective endpoint settings after profile overrides are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ResolvedProfile {
    /// Profile for `endpoint` with default generation settings
    pub fn for_endpoint(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        GenerationSettings::default().apply(name.into(), &ModelProfile::new(endpoint))
    }
}

impl GenerationSettings {
    fn apply(&self, name: String, profile: &ModelProfile) -> ResolvedProfile {
        ResolvedProfile {
            name,
            endpoint: profile.endpoint.clone(),
            model: profile.model.clone(),
            api_key: profile.api_key.clone(),
            temperature: profile.temperature.unwrap_or(self.temperature),
            max_tokens: profile.max_tokens.unwrap_or(self.max_tokens),
            timeout: Duration::from_secs(profile.timeout_seconds.unwrap_or(self.timeout_seconds)),
        }
    }
}

/// True if `name` is an http(s) URL usable as an ad-hoc endpoint
pub fn is_endpoint_url(name: &str) -> bool {
    name.starts_with("http://") || name.starts_with("https://")
}

impl AppConfig {
    /// Configuration with the bundled model profiles and no files applied
    pub fn with_builtin_models() -> Self {
        let mut config = Self::default();
        for (name, endpoint) in builtin_models() {
            config
                .models
                .insert(name.to_string(), ModelProfile::new(endpoint));
        }
        config
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelProfile> {
        self.models.get(name)
    }

    /// Profile names, sorted
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a profile by name.
    ///
    /// A URL that is not a configured name becomes an ad-hoc endpoint. Any
    /// other unknown name falls back to the `default` profile.
    pub fn resolve_profile(&self, name: &str) -> ResolvedProfile {
        if let Some(profile) = self.models.get(name) {
            return self.settings.apply(name.to_string(), profile);
        }
        if is_endpoint_url(name) {
            return self
                .settings
                .apply(name.to_string(), &ModelProfile::new(name));
        }
        match self.models.get(DEFAULT_PROFILE) {
            Some(profile) => self.settings.apply(DEFAULT_PROFILE.to_string(), profile),
            None => self
                .settings
                .apply(DEFAULT_PROFILE.to_string(), &ModelProfile::new(OLLAMA_ENDPOINT)),
        }
    }

    /// Register an ad-hoc endpoint under its own URL
    pub fn add_endpoint(&mut self, url: &str) {
        self.models
            .entry(url.to_string())
            .or_insert_with(|| ModelProfile::new(url));
    }

    /// Flattened `section.key: value` lines with secret values masked
    pub fn masked_summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Ok(value) = serde_json::to_value(self) {
            flatten_masked("", &value, &mut lines);
        }
        lines.sort();
        lines
    }
}

fn builtin_models() -> [(&'static str, &'static str); 3] {
    [
        (DEFAULT_PROFILE, OLLAMA_ENDPOINT),
        ("ollama", OLLAMA_ENDPOINT),
        ("lmstudio", LMSTUDIO_ENDPOINT),
    ]
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

fn flatten_masked(prefix: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                // max_tokens is a number, not a credential
                if is_secret_key(key) && !child.is_number() && !child.is_null() {
                    lines.push(format!("{}: ***", path));
                } else {
                    flatten_masked(&path, child, lines);
                }
            }
        }
        Value::String(s) => lines.push(format!("{}: {}", prefix, s)),
        other => lines.push(format!("{}: {}", prefix, other)),
    }
}

/// Load configuration from the default locations
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut files = vec![PathBuf::from(".aicode/config.yaml")];
    if let Some(home) = dirs::home_dir() {
        files.push(home.join(".aicode/config.yaml"));
    }
    load_config_from(&files)
}

/// Load configuration layering `files` (lowest priority first) over the
/// defaults, then `AICODE_` environment variables on top.
pub fn load_config_from(files: &[PathBuf]) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder()
        .set_default("shell.default_model", DEFAULT_PROFILE)?
        .set_default("shell.run_model_tool_calls", false)?;

    for (name, endpoint) in builtin_models() {
        builder = builder.set_default(format!("models.{}.endpoint", name), endpoint)?;
    }

    for file in files {
        if file.exists() {
            builder = builder.add_source(File::from(file.clone()).required(false));
        }
    }

    // e.g. AICODE_SHELL__DEFAULT_MODEL=lmstudio, AICODE_SETTINGS__TIMEOUT_SECONDS=60
    builder = builder.add_source(
        Environment::with_prefix("AICODE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// Commented starter configuration written by `aicode init`
pub fn default_config_yaml() -> String {
    format!(
        r#"# AiCode configuration
shell:
  default_model: {default}
  # Execute TOOL: lines that appear in model replies
  run_model_tool_calls: false

models:
  {default}:
    endpoint: {ollama}
  ollama:
    endpoint: {ollama}
  lmstudio:
    endpoint: {lmstudio}
  # remote:
  #   endpoint: https://api.example.com/v1/chat/completions
  #   model: gpt-4o-mini
  #   api_key: sk-...
  #   timeout_seconds: 60

settings:
  temperature: 0.7
  max_tokens: 2048
  timeout_seconds: 30

paths:
  context_file: aicode.md
  sessions_dir: .aicode/sessions
  custom_tools_file: .aicode/custom_tools.json
"#,
        default = DEFAULT_PROFILE,
        ollama = OLLAMA_ENDPOINT,
        lmstudio = LMSTUDIO_ENDPOINT,
    )
}

/// Write the starter configuration. Returns false if the file exists and
/// `force` is not set.
pub fn write_default_config(path: &Path, force: bool) -> io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, default_config_yaml())?;
    Ok(true)
}
