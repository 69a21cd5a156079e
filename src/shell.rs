//! Interactive shell.
//!
//! Routes each input line to one of three handlers: a slash command, the tool
//! executor (any line carrying a parsable `TOOL:` invocation), or a
//! conversation turn against the active completion endpoint.
//!
//! `/debug` with no argument switches the shell into debug mode, where each
//! line is a debug command until `quit`. Every error shown to the user is
//! also recorded in the session's error log.

use crate::analyzer;
use crate::config::{is_endpoint_url, AppConfig};
use crate::context::{self, build_messages, ContextExcerpt, EXCERPT_LINES};
use crate::custom_tools::CustomToolCatalog;
use crate::plan::ProjectPlan;
use crate::prompt::build_system_prompt;
use crate::providers::{CompletionBackend, CompletionClient};
use crate::session::{default_session_name, ConversationSession, SessionStore};
use crate::tool_intercept::{
    contains_tool_marker, execute_invocations, format_tool_results, parse_tool_calls,
    ToolInvocation,
};
use crate::tools::ToolRegistry;
use anyhow::{bail, Context as _, Result};
use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Context, Editor, Helper, Highlighter, Hinter, Validator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exchanges shown by `/history`
const HISTORY_DISPLAY: usize = 5;
/// Assistant text shown per exchange in `/history`
const HISTORY_PREVIEW_CHARS: usize = 200;
/// Errors shown by `/debug errors`
const DEBUG_ERRORS_SHOWN: usize = 5;

const DEBUG_HELP: &str = "Debug commands: analyze <code>, trace <file>, errors, help, quit";

/// Slash commands with their one-line help, in display order
pub const COMMANDS: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/models", "List model profiles and check connectivity"),
    ("/switch", "Switch model: /switch <name|url>"),
    ("/tools", "List available tools"),
    ("/clear", "Clear conversation history"),
    ("/history", "Show recent exchanges"),
    ("/context", "Show the project context excerpt"),
    ("/edit-context", "Create or edit the project context file"),
    ("/reload-context", "Reload the project context file"),
    ("/analyze", "Analyze a Python file: /analyze <file>"),
    ("/debug", "Debug mode, or one command: /debug [analyze <code>|trace <file>|errors]"),
    ("/plan", "Create a project plan: /plan <task>"),
    ("/add-tool", "Add a custom tool: /add-tool <name> <command template>"),
    ("/save-session", "Save the session: /save-session [name]"),
    ("/load-session", "Load a session, or list saved ones: /load-session [name]"),
    ("/status", "Show session status"),
    ("/config", "Show configuration (secrets masked)"),
    ("/exit", "Exit"),
    ("/quit", "Exit"),
];

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Models,
    Switch(Option<String>),
    Tools,
    Clear,
    History,
    Context,
    EditContext,
    ReloadContext,
    Analyze(Option<String>),
    Debug(Option<String>),
    Plan(Option<String>),
    AddTool { name: Option<String>, template: String },
    SaveSession(Option<String>),
    LoadSession(Option<String>),
    Status,
    Config,
    Exit,
    Unknown(String),
}

impl SlashCommand {
    /// Parse a line beginning with `/`; anything else is not a command
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('/') {
            return None;
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let command = match head.to_lowercase().as_str() {
            "/help" => Self::Help,
            "/models" => Self::Models,
            "/switch" => Self::Switch(arg),
            "/tools" => Self::Tools,
            "/clear" => Self::Clear,
            "/history" => Self::History,
            "/context" => Self::Context,
            "/edit-context" => Self::EditContext,
            "/reload-context" => Self::ReloadContext,
            "/analyze" => Self::Analyze(arg),
            "/debug" => Self::Debug(arg),
            "/plan" => Self::Plan(arg),
            "/add-tool" => {
                let (name, template) = match rest.split_once(char::is_whitespace) {
                    Some((name, template)) => (Some(name.to_string()), template.trim().to_string()),
                    None => (arg, String::new()),
                };
                Self::AddTool { name, template }
            }
            "/save-session" => Self::SaveSession(arg),
            "/load-session" => Self::LoadSession(arg),
            "/status" => Self::Status,
            "/config" => Self::Config,
            "/exit" | "/quit" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        };
        Some(command)
    }
}

/// A command inside debug mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    Analyze(String),
    Trace(String),
    Errors,
    Help,
    Quit,
    Unknown(String),
}

impl DebugCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match head.to_lowercase().as_str() {
            "analyze" => Self::Analyze(rest.to_string()),
            "trace" => Self::Trace(rest.to_string()),
            "errors" => Self::Errors,
            "help" | "" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// What the caller should do after a line was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Print the text (possibly empty) and keep reading
    Continue(String),
    Exit,
}

/// Shell state: configuration, tools, session and the active backend
pub struct Shell {
    config: AppConfig,
    registry: ToolRegistry,
    catalog: CustomToolCatalog,
    session: ConversationSession,
    store: SessionStore,
    backend: Arc<dyn CompletionBackend>,
    plans: Vec<ProjectPlan>,
    debug_mode: bool,
    editor: Option<String>,
    interactive: bool,
}

impl Shell {
    /// Shell talking to the profile named `model` (or the configured default)
    pub fn new(config: AppConfig, model: Option<&str>) -> Self {
        let name = model.unwrap_or(&config.shell.default_model).to_string();
        let profile = config.resolve_profile(&name);
        let backend: Arc<dyn CompletionBackend> = Arc::new(CompletionClient::new(profile));

        let mut shell = Self::with_backend(config, backend);
        shell.editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .ok()
            .filter(|e| !e.trim().is_empty());
        shell.interactive = true;
        shell
    }

    /// Non-interactive shell over an arbitrary backend
    pub fn with_backend(config: AppConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        let catalog = match CustomToolCatalog::load(&config.paths.custom_tools_file) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, path = ?config.paths.custom_tools_file, "Ignoring custom tools file");
                CustomToolCatalog::new(&config.paths.custom_tools_file)
            }
        };
        let registry = ToolRegistry::new().with_catalog(&catalog);

        let excerpt = match ContextExcerpt::load(&config.paths.context_file) {
            Ok(excerpt) => excerpt,
            Err(e) => {
                warn!(error = %e, path = ?config.paths.context_file, "Failed to read project context");
                ContextExcerpt::default()
            }
        };

        let session = ConversationSession::new(backend.profile().name.clone(), excerpt);
        let store = SessionStore::new(&config.paths.sessions_dir);

        Self {
            config,
            registry,
            catalog,
            session,
            store,
            backend,
            plans: Vec::new(),
            debug_mode: false,
            editor: None,
            interactive: false,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn in_debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn plans(&self) -> &[ProjectPlan] {
        &self.plans
    }

    /// Handle one line of input. Errors are rendered, never returned.
    pub async fn handle_line(&mut self, line: &str) -> LineOutcome {
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::Continue(String::new());
        }

        let result = if self.debug_mode {
            self.run_debug(DebugCommand::parse(line)).map(LineOutcome::Continue)
        } else if let Some(command) = SlashCommand::parse(line) {
            self.run_command(command).await
        } else {
            let calls = tool_calls_in(line);
            if calls.is_empty() {
                self.converse(line).await.map(LineOutcome::Continue)
            } else {
                Ok(LineOutcome::Continue(self.run_tools(&calls).await))
            }
        };

        result.unwrap_or_else(|e| {
            let message = format!("{:#}", e);
            self.session.record_error(message.as_str());
            LineOutcome::Continue(format!("{} {}", "Error:".red(), message))
        })
    }

    /// Execute invocations, logging each failing tool in the error log
    async fn run_tools(&mut self, calls: &[ToolInvocation]) -> String {
        let results = execute_invocations(&self.registry, calls).await;
        for (invocation, result) in &results {
            if let Err(e) = result {
                self.session.record_error(format!("{}: {}", invocation.name, e));
            }
        }
        format_tool_results(&results)
    }

    /// One conversation turn. History only grows on success.
    async fn converse(&mut self, text: &str) -> Result<String> {
        self.session.begin_turn()?;

        let base = build_system_prompt(&self.registry.specs());
        let messages = build_messages(&base, self.session.context(), self.session.history(), text);

        let spinner = self.spinner("Thinking...");
        let result = self.backend.complete(messages).await;
        spinner.finish_and_clear();

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.session.abandon_turn();
                warn!(error = %e, model = %self.session.active_model(), "Completion failed");
                bail!("Could not get response from model: {}", e);
            }
        };
        self.session.complete_turn(text, reply.as_str())?;

        if !self.config.shell.run_model_tool_calls {
            return Ok(reply);
        }
        let calls = tool_calls_in(&reply);
        if calls.is_empty() {
            return Ok(reply);
        }
        debug!(count = calls.len(), "Executing tool calls from model reply");
        let results = self.run_tools(&calls).await;
        Ok(format!("{}\n\n{}", reply, results))
    }

    fn spinner(&self, message: &'static str) -> ProgressBar {
        if !self.interactive {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    async fn run_command(&mut self, command: SlashCommand) -> Result<LineOutcome> {
        let output = match command {
            SlashCommand::Help => help_text(),
            SlashCommand::Models => self.models_report().await,
            SlashCommand::Switch(target) => self.switch_model(target)?,
            SlashCommand::Tools => self.tools_report(),
            SlashCommand::Clear => {
                self.session.clear_history();
                "Conversation history cleared".green().to_string()
            }
            SlashCommand::History => self.history_report(),
            SlashCommand::Context => self.context_report(),
            SlashCommand::EditContext => self.edit_context().await?,
            SlashCommand::ReloadContext => self.reload_context()?,
            SlashCommand::Analyze(path) => {
                let path = path.context("Usage: /analyze <file>")?;
                self.trace_file(&path)?
            }
            SlashCommand::Debug(None) => {
                self.debug_mode = true;
                format!("{}\n{}", "Debug mode".cyan(), DEBUG_HELP)
            }
            SlashCommand::Debug(Some(line)) => self.run_debug(DebugCommand::parse(&line))?,
            SlashCommand::Plan(task) => {
                let task = task.context("Usage: /plan <task>")?;
                let plan = ProjectPlan::new(task);
                let output = format!("{}", plan);
                self.plans.push(plan);
                debug!(plans = self.plans.len(), "Plan created");
                output
            }
            SlashCommand::AddTool { name, template } => {
                let Some(name) = name else {
                    bail!("Usage: /add-tool <name> <command template>");
                };
                self.catalog.add(&name, &template)?;
                self.registry.register_template(&name, &template);
                format!(
                    "{} {} (saved to {})",
                    "Added tool:".green(),
                    name.to_lowercase(),
                    self.catalog.path().display()
                )
            }
            SlashCommand::SaveSession(name) => {
                let name = name.unwrap_or_else(default_session_name);
                let path = self.store.save(&name, &self.session.snapshot())?;
                format!("{} {}", "Session saved:".green(), path.display())
            }
            SlashCommand::LoadSession(None) => self.sessions_report(),
            SlashCommand::LoadSession(Some(name)) => {
                let snapshot = self.store.load(&name)?;
                let saved_model = snapshot.active_model.clone();
                self.session.restore(snapshot);
                self.backend = self.connect(&saved_model);

                // An unknown saved model resolves to the default profile
                let model = self.backend.profile().name.clone();
                if model != saved_model {
                    warn!(saved = %saved_model, using = %model, "Saved model not configured");
                }
                self.session.set_active_model(model.as_str());
                format!(
                    "{} {} ({} exchanges, model {})",
                    "Session loaded:".green(),
                    name,
                    self.session.history().len(),
                    model
                )
            }
            SlashCommand::Status => self.status_report().await,
            SlashCommand::Config => self.config.masked_summary().join("\n"),
            SlashCommand::Exit => return Ok(LineOutcome::Exit),
            SlashCommand::Unknown(name) => {
                bail!("Unknown command: {} (type /help for commands)", name)
            }
        };
        Ok(LineOutcome::Continue(output))
    }

    fn run_debug(&mut self, command: DebugCommand) -> Result<String> {
        let output = match command {
            DebugCommand::Analyze(code) => {
                if code.is_empty() {
                    bail!("Usage: analyze <code>");
                }
                let analysis = analyzer::analyze_code(&code);
                let report = analysis.to_string();
                if !analysis.is_valid() {
                    self.session.record_error(report.as_str());
                }
                report
            }
            DebugCommand::Trace(path) => {
                if path.is_empty() {
                    bail!("Usage: trace <file>");
                }
                self.trace_file(&path)?
            }
            DebugCommand::Errors => {
                let errors = self.session.recent_errors(DEBUG_ERRORS_SHOWN);
                if errors.is_empty() {
                    "No errors recorded".green().to_string()
                } else {
                    errors
                        .iter()
                        .map(|e| format!("- [{}] {}", e.timestamp.format("%H:%M:%S"), e.message))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            DebugCommand::Help => DEBUG_HELP.to_string(),
            DebugCommand::Quit => {
                self.debug_mode = false;
                "Exited debug mode".yellow().to_string()
            }
            DebugCommand::Unknown(line) => bail!("Unknown debug command: {}", line),
        };
        Ok(output)
    }

    /// Analyze a file, logging a syntax error in the error log
    fn trace_file(&mut self, path: &str) -> Result<String> {
        let analysis = analyzer::analyze_file(path)
            .with_context(|| format!("Failed to read '{}'", path))?;
        if !analysis.is_valid() {
            self.session.record_error(format!("{}: {}", path, analysis));
        }
        Ok(format!("{}\n{}", format!("Analysis of {}:", path).cyan(), analysis))
    }

    fn connect(&self, name: &str) -> Arc<dyn CompletionBackend> {
        Arc::new(CompletionClient::new(self.config.resolve_profile(name)))
    }

    fn switch_model(&mut self, target: Option<String>) -> Result<String> {
        let Some(target) = target else {
            bail!("Usage: /switch <name|url>");
        };

        if self.config.get_model(&target).is_none() {
            if !is_endpoint_url(&target) {
                bail!(
                    "Unknown model '{}'. Available: {}",
                    target,
                    self.config.model_names().join(", ")
                );
            }
            self.config.add_endpoint(&target);
        }

        self.backend = self.connect(&target);
        self.session.set_active_model(target.as_str());
        Ok(format!(
            "{} {} ({})",
            "Switched to".green(),
            target,
            self.backend.profile().endpoint
        ))
    }

    async fn models_report(&self) -> String {
        let mut lines = vec!["Models:".cyan().to_string()];
        for name in self.config.model_names() {
            let client = CompletionClient::new(self.config.resolve_profile(name));
            let reachable = match client.ping().await {
                Ok(()) => "online".green().to_string(),
                Err(e) => {
                    debug!(model = %name, error = %e, "Model unreachable");
                    "offline".red().to_string()
                }
            };
            let marker = if name == self.session.active_model() { "*" } else { " " };
            lines.push(format!(
                "{} {} {} [{}]",
                marker,
                name,
                client.profile().endpoint,
                reachable
            ));
        }
        lines.join("\n")
    }

    fn tools_report(&self) -> String {
        let mut lines = vec!["Tools:".cyan().to_string()];
        for spec in self.registry.specs() {
            lines.push(format!("  {} - {}", spec.name, spec.description));
            lines.push(format!("    {}", spec.usage));
        }
        lines.join("\n")
    }

    fn history_report(&self) -> String {
        let history = self.session.history();
        if history.is_empty() {
            return "No conversation history".to_string();
        }

        let start = history.len().saturating_sub(HISTORY_DISPLAY);
        let mut lines = Vec::new();
        for (i, exchange) in history[start..].iter().enumerate() {
            lines.push(format!(
                "{} [{}]",
                format!("#{}", start + i + 1).cyan(),
                exchange.timestamp.format("%H:%M:%S")
            ));
            lines.push(format!("  You: {}", exchange.user_text));
            lines.push(format!(
                "  AI: {}",
                truncate_chars(&exchange.assistant_text, HISTORY_PREVIEW_CHARS)
            ));
        }
        lines.join("\n")
    }

    fn context_report(&self) -> String {
        let excerpt = self.session.context();
        if excerpt.is_empty() {
            return format!(
                "No project context loaded. Create {} or use /edit-context.",
                self.config.paths.context_file.display()
            );
        }

        let mut lines = vec![format!("Project context ({} lines):", excerpt.len())
            .cyan()
            .to_string()];
        lines.extend(excerpt.head(EXCERPT_LINES).iter().cloned());
        if excerpt.len() > EXCERPT_LINES {
            lines.push(format!("... {} more lines", excerpt.len() - EXCERPT_LINES));
        }
        lines.join("\n")
    }

    async fn edit_context(&mut self) -> Result<String> {
        let path = self.config.paths.context_file.clone();
        let created = context::create_context_template(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        if let Some(editor) = &self.editor {
            let status = tokio::process::Command::new(editor)
                .arg(&path)
                .status()
                .await
                .with_context(|| format!("Failed to launch editor '{}'", editor))?;
            if !status.success() {
                warn!(editor = %editor, status = ?status.code(), "Editor exited with failure");
            }
        }

        let reloaded = self.reload_context()?;
        if created {
            Ok(format!("Created {}\n{}", path.display(), reloaded))
        } else {
            Ok(reloaded)
        }
    }

    fn reload_context(&mut self) -> Result<String> {
        let path = &self.config.paths.context_file;
        let excerpt = ContextExcerpt::load(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let count = excerpt.len();
        self.session.reload_context(excerpt);
        Ok(format!("{} ({} lines)", "Context reloaded".green(), count))
    }

    fn sessions_report(&self) -> String {
        let names = self.store.list();
        if names.is_empty() {
            return format!("No saved sessions in {}", self.store.dir().display());
        }
        let mut lines = vec![format!("Saved sessions ({}):", self.store.dir().display())
            .cyan()
            .to_string()];
        lines.extend(names.into_iter().map(|name| format!("  {}", name)));
        lines.join("\n")
    }

    async fn status_report(&self) -> String {
        let profile = self.backend.profile();
        let reachable = match self.backend.ping().await {
            Ok(()) => "online".green().to_string(),
            Err(e) => format!("{} ({})", "offline".red(), e),
        };
        [
            format!("Model: {} ({})", self.session.active_model(), profile.endpoint),
            format!("Endpoint: {}", reachable),
            format!("Exchanges: {}", self.session.history().len()),
            format!("Context lines: {}", self.session.context().len()),
            format!(
                "Custom tools: {} ({})",
                self.catalog.len(),
                self.catalog.path().display()
            ),
            format!(
                "Recorded errors: {}",
                self.session.recent_errors(usize::MAX).len()
            ),
            format!(
                "Run model tool calls: {}",
                self.config.shell.run_model_tool_calls
            ),
        ]
        .join("\n")
    }
}

fn help_text() -> String {
    let mut lines = vec!["Commands:".cyan().to_string()];
    for (name, help) in COMMANDS {
        lines.push(format!("  {:<16} {}", name, help));
    }
    lines.push(String::new());
    lines.push("Run a tool directly: TOOL: read_file path=main.py".to_string());
    lines.push("Anything else is sent to the model.".to_string());
    lines.join("\n")
}

/// Tool invocations in `text`; the marker check skips the full scan
fn tool_calls_in(text: &str) -> Vec<ToolInvocation> {
    if contains_tool_marker(text) {
        parse_tool_calls(text)
    } else {
        Vec::new()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

// === Line editor ===

#[derive(Helper, Hinter, Highlighter, Validator)]
struct ShellHelper;

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let typed = &line[..pos];
        if !typed.starts_with('/') || typed.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }
        let candidates = COMMANDS
            .iter()
            .filter(|(name, _)| name.starts_with(typed))
            .map(|(name, _)| Pair {
                display: name.to_string(),
                replacement: name.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".aicode").join("history.txt"))
}

fn save_history(rl: &mut Editor<ShellHelper, DefaultHistory>, path: &Option<PathBuf>) {
    if let Some(path) = path {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "Failed to create history directory");
            }
        }
        if let Err(e) = rl.save_history(path) {
            warn!(error = %e, "Failed to save history");
        }
    }
}

/// Read-eval-print loop until `/exit` or end of input
pub async fn run_interactive(mut shell: Shell) -> Result<()> {
    let mut rl: Editor<ShellHelper, DefaultHistory> =
        Editor::new().context("Failed to create line editor")?;
    rl.set_helper(Some(ShellHelper));

    let history = history_path();
    if let Some(path) = &history {
        if let Err(e) = rl.load_history(path) {
            let not_found = matches!(&e, ReadlineError::Io(io) if io.kind() == std::io::ErrorKind::NotFound);
            if !not_found {
                warn!(error = %e, "Failed to load history");
            }
        }
    }

    println!(
        "{} model {} - type /help for commands",
        "AiCode".cyan().bold(),
        shell.session().active_model()
    );

    loop {
        let prompt = if shell.in_debug_mode() {
            "(debug) ".to_string()
        } else {
            format!("aicode({})> ", shell.session().active_model())
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(line.as_str()) {
                    warn!(error = %e, "Failed to add history entry");
                }
                match shell.handle_line(&line).await {
                    LineOutcome::Continue(output) => {
                        if !output.is_empty() {
                            println!("{}", output);
                        }
                    }
                    LineOutcome::Exit => break,
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                save_history(&mut rl, &history);
                return Err(e).context("Failed to read input");
            }
        }
    }

    save_history(&mut rl, &history);
    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedProfile;
    use crate::providers::{ChatMessage, EndpointError};
    use crate::session::SessionState;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Backend that replays canned replies and records requests
    struct ScriptedBackend {
        profile: ResolvedProfile,
        replies: Mutex<Vec<Result<String, EndpointError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, EndpointError>>) -> Arc<Self> {
            Arc::new(Self {
                profile: ResolvedProfile::for_endpoint("scripted", "http://127.0.0.1:9/v1"),
                replies: Mutex::new(replies.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn profile(&self) -> &ResolvedProfile {
            &self.profile
        }

        async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, EndpointError> {
            self.requests.lock().unwrap().push(messages);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(EndpointError::Connection("no reply scripted".into())))
        }

        async fn ping(&self) -> Result<(), EndpointError> {
            Ok(())
        }
    }

    fn test_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::with_builtin_models();
        config.paths.context_file = dir.path().join("aicode.md");
        config.paths.sessions_dir = dir.path().join("sessions");
        config.paths.custom_tools_file = dir.path().join("custom_tools.json");
        config
    }

    fn text(outcome: LineOutcome) -> String {
        match outcome {
            LineOutcome::Continue(text) => text,
            LineOutcome::Exit => panic!("unexpected exit"),
        }
    }

    // ========================================================================
    // Command parsing
    // ========================================================================

    #[test]
    fn test_parse_commands() {
        assert_eq!(SlashCommand::parse("hello"), None);
        assert_eq!(SlashCommand::parse("/help"), Some(SlashCommand::Help));
        assert_eq!(SlashCommand::parse("/QUIT"), Some(SlashCommand::Exit));
        assert_eq!(
            SlashCommand::parse("/switch lmstudio"),
            Some(SlashCommand::Switch(Some("lmstudio".into())))
        );
        assert_eq!(SlashCommand::parse("/switch"), Some(SlashCommand::Switch(None)));
        assert_eq!(
            SlashCommand::parse("/add-tool lint ruff check {path}"),
            Some(SlashCommand::AddTool {
                name: Some("lint".into()),
                template: "ruff check {path}".into()
            })
        );
        assert_eq!(
            SlashCommand::parse("/bogus"),
            Some(SlashCommand::Unknown("/bogus".into()))
        );
    }

    #[test]
    fn test_every_listed_command_parses() {
        for (name, _) in COMMANDS {
            let parsed = SlashCommand::parse(name).unwrap();
            assert!(!matches!(parsed, SlashCommand::Unknown(_)), "{}", name);
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 200), "short");
        let long = "é".repeat(250);
        let cut = truncate_chars(&long, 200);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
    }

    // ========================================================================
    // Conversation turns
    // ========================================================================

    #[tokio::test]
    async fn test_turn_appends_history() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("Use pathlib.".into())]);
        let mut shell = Shell::with_backend(test_config(&dir), backend.clone());

        let out = text(shell.handle_line("how do I read files?").await);
        assert_eq!(out, "Use pathlib.");
        assert_eq!(shell.session().history().len(), 1);
        assert_eq!(shell.session().state(), SessionState::Idle);

        let requests = backend.requests.lock().unwrap();
        let sent = &requests[0];
        assert_eq!(sent.len(), 2);
        assert!(sent[0].content.starts_with("You are AiCode"));
        assert_eq!(sent[1], ChatMessage::user("how do I read files?"));
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_untouched() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok("first".into()),
            Err(EndpointError::Status {
                status: 500,
                body: "down".into(),
            }),
        ]);
        let mut shell = Shell::with_backend(test_config(&dir), backend);

        shell.handle_line("one").await;
        let out = text(shell.handle_line("two").await);
        assert!(out.contains("HTTP 500"));
        assert_eq!(shell.session().history().len(), 1);
        assert_eq!(shell.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_history_replayed_in_later_turns() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("a1".into()), Ok("a2".into())]);
        let mut shell = Shell::with_backend(test_config(&dir), backend.clone());

        shell.handle_line("q1").await;
        shell.handle_line("q2").await;

        let requests = backend.requests.lock().unwrap();
        let contents: Vec<&str> = requests[1][1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2"]);
    }

    #[tokio::test]
    async fn test_model_tool_calls_run_when_enabled() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "remember this").unwrap();

        let mut config = test_config(&dir);
        config.shell.run_model_tool_calls = true;
        let reply = format!("Let me look.\nTOOL: read_file path={}", file.display());
        let backend = ScriptedBackend::new(vec![Ok(reply)]);
        let mut shell = Shell::with_backend(config, backend);

        let out = text(shell.handle_line("what is in notes?").await);
        assert!(out.starts_with("Let me look."));
        assert!(out.contains("Tool result (read_file):\nremember this"));
    }

    // ========================================================================
    // Tool short-circuit
    // ========================================================================

    #[tokio::test]
    async fn test_tool_line_bypasses_model() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![]);
        let mut shell = Shell::with_backend(test_config(&dir), backend.clone());

        let out = text(shell.handle_line("TOOL: analyze_code code=\"def f(): pass\"").await);
        assert!(out.contains("Functions: f"));
        assert!(backend.requests.lock().unwrap().is_empty());
        assert!(shell.session().history().is_empty());
    }

    // ========================================================================
    // Slash commands
    // ========================================================================

    #[tokio::test]
    async fn test_exit_and_unknown() {
        let dir = TempDir::new().unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));
        assert_eq!(shell.handle_line("/exit").await, LineOutcome::Exit);
        assert!(text(shell.handle_line("/nope").await).contains("Unknown command: /nope"));
    }

    #[tokio::test]
    async fn test_switch_known_url_and_unknown() {
        let dir = TempDir::new().unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));

        shell.handle_line("/switch lmstudio").await;
        assert_eq!(shell.session().active_model(), "lmstudio");

        let url = "http://127.0.0.1:8000/v1/chat/completions";
        shell.handle_line(&format!("/switch {}", url)).await;
        assert_eq!(shell.session().active_model(), url);
        assert!(shell.config().get_model(url).is_some());

        let out = text(shell.handle_line("/switch nonsense").await);
        assert!(out.contains("Unknown model 'nonsense'"));
        assert_eq!(shell.session().active_model(), url);
    }

    #[tokio::test]
    async fn test_clear_and_history() {
        let dir = TempDir::new().unwrap();
        let long_reply = "x".repeat(300);
        let backend = ScriptedBackend::new(vec![Ok(long_reply)]);
        let mut shell = Shell::with_backend(test_config(&dir), backend);

        assert_eq!(text(shell.handle_line("/history").await), "No conversation history");
        shell.handle_line("question").await;

        let out = text(shell.handle_line("/history").await);
        assert!(out.contains("You: question"));
        assert!(out.contains(&format!("AI: {}...", "x".repeat(200))));

        shell.handle_line("/clear").await;
        assert!(shell.session().history().is_empty());
    }

    #[tokio::test]
    async fn test_context_reload() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let context_file = config.paths.context_file.clone();
        let mut shell = Shell::with_backend(config, ScriptedBackend::new(vec![]));

        assert!(text(shell.handle_line("/context").await).contains("No project context"));

        std::fs::write(&context_file, "# Demo\nFlask app\n").unwrap();
        shell.handle_line("/reload-context").await;
        let out = text(shell.handle_line("/context").await);
        assert!(out.contains("2 lines"));
        assert!(out.contains("Flask app"));
    }

    #[tokio::test]
    async fn test_edit_context_creates_template() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let context_file = config.paths.context_file.clone();
        let mut shell = Shell::with_backend(config, ScriptedBackend::new(vec![]));

        let out = text(shell.handle_line("/edit-context").await);
        assert!(out.contains("Created"));
        assert!(context_file.exists());
        assert!(!shell.session().context().is_empty());
    }

    #[tokio::test]
    async fn test_add_tool_persists_and_runs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let catalog_path = config.paths.custom_tools_file.clone();
        let mut shell = Shell::with_backend(config.clone(), ScriptedBackend::new(vec![]));

        let out = text(shell.handle_line("/add-tool greet echo hello {who}").await);
        assert!(out.contains("custom_tools.json"));
        assert!(catalog_path.exists());

        let out = text(shell.handle_line("TOOL: greet who=shell").await);
        assert!(out.contains("hello shell"));

        // A fresh shell picks the tool up from the catalog file
        let fresh = Shell::with_backend(config, ScriptedBackend::new(vec![]));
        assert!(fresh.registry().get("greet").is_some());
    }

    #[tokio::test]
    async fn test_save_and_load_session() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("answer".into())]);
        let mut shell = Shell::with_backend(test_config(&dir), backend);

        shell.handle_line("question").await;
        assert!(text(shell.handle_line("/save-session demo").await).contains("Session saved"));

        shell.handle_line("/clear").await;
        assert!(text(shell.handle_line("/load-session").await).contains("demo"));

        let out = text(shell.handle_line("/load-session demo").await);
        assert!(out.contains("1 exchanges"));
        assert_eq!(shell.session().history()[0].assistant_text, "answer");

        let missing = text(shell.handle_line("/load-session ghost").await);
        assert!(missing.contains("not found"));
    }

    #[tokio::test]
    async fn test_analyze_command() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.py");
        std::fs::write(&file, "import os\nclass App: pass\n").unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));

        let out = text(shell.handle_line(&format!("/analyze {}", file.display())).await);
        assert!(out.contains("Classes: App"));
        assert!(out.contains("Imports: os"));

        assert!(text(shell.handle_line("/analyze").await).contains("Usage: /analyze"));
    }

    #[tokio::test]
    async fn test_config_and_status() {
        let dir = TempDir::new().unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));

        let config = text(shell.handle_line("/config").await);
        assert!(config.contains("settings.temperature: 0.7"));
        assert!(config.contains("models.lmstudio.endpoint: http://localhost:1234"));

        let status = text(shell.handle_line("/status").await);
        assert!(status.contains("Model: scripted"));
        assert!(status.contains("Exchanges: 0"));
    }

    #[tokio::test]
    async fn test_load_session_uses_resolved_model() {
        let dir = TempDir::new().unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));
        // The scripted backend's profile name is not a configured model
        shell.handle_line("/save-session orphan").await;

        let out = text(shell.handle_line("/load-session orphan").await);
        assert!(out.contains("model default"));
        assert_eq!(shell.session().active_model(), "default");

        let status = text(shell.handle_line("/status").await);
        assert!(status.contains("Model: default (http://localhost:11434"));
    }

    #[tokio::test]
    async fn test_sessions_listing_names_directory() {
        let dir = TempDir::new().unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));

        let out = text(shell.handle_line("/load-session").await);
        assert!(out.starts_with("No saved sessions in "));
        assert!(out.contains("sessions"));
    }

    // ========================================================================
    // Debug mode and error log
    // ========================================================================

    #[test]
    fn test_parse_debug_commands() {
        assert_eq!(
            DebugCommand::parse("analyze x = 1"),
            DebugCommand::Analyze("x = 1".into())
        );
        assert_eq!(DebugCommand::parse("trace app.py"), DebugCommand::Trace("app.py".into()));
        assert_eq!(DebugCommand::parse("errors"), DebugCommand::Errors);
        assert_eq!(DebugCommand::parse("q"), DebugCommand::Quit);
        assert_eq!(DebugCommand::parse(""), DebugCommand::Help);
        assert_eq!(
            DebugCommand::parse("dance now"),
            DebugCommand::Unknown("dance now".into())
        );
    }

    #[tokio::test]
    async fn test_debug_mode_routes_lines() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![]);
        let mut shell = Shell::with_backend(test_config(&dir), backend.clone());

        assert!(text(shell.handle_line("/debug").await).contains("Debug commands"));
        assert!(shell.in_debug_mode());

        let out = text(shell.handle_line("analyze def f(): pass").await);
        assert!(out.contains("Functions: f"));
        assert!(text(shell.handle_line("errors").await).contains("No errors recorded"));

        assert!(text(shell.handle_line("quit").await).contains("Exited debug mode"));
        assert!(!shell.in_debug_mode());
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_debug_errors_lists_last_five() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Err(EndpointError::Timeout(30))]);
        let mut shell = Shell::with_backend(test_config(&dir), backend);

        shell.handle_line("hello").await;
        shell.handle_line("/debug analyze def f():\nreturn 1").await;
        shell.handle_line("TOOL: read_file").await;
        for i in 0..3 {
            shell.handle_line(&format!("/bogus{}", i)).await;
        }

        let out = text(shell.handle_line("/debug errors").await);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(!out.contains("timed out"));
        assert!(lines[0].contains("Syntax Error"));
        assert!(lines[1].contains("read_file: path parameter required"));
        assert!(lines[4].contains("Unknown command: /bogus2"));
    }

    #[tokio::test]
    async fn test_debug_trace_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("broken.py");
        std::fs::write(&file, "print \"hi\"\n").unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));

        let out = text(shell.handle_line(&format!("/debug trace {}", file.display())).await);
        assert!(out.contains("Syntax Error"));
        assert_eq!(shell.session().recent_errors(5).len(), 1);
        assert!(!shell.in_debug_mode());
    }

    // ========================================================================
    // Plans
    // ========================================================================

    #[tokio::test]
    async fn test_plan_command() {
        let dir = TempDir::new().unwrap();
        let mut shell = Shell::with_backend(test_config(&dir), ScriptedBackend::new(vec![]));

        let out = text(shell.handle_line("/plan build a REST API").await);
        assert!(out.starts_with("Plan: build a REST API"));
        assert!(out.contains("Total: 10 hours"));
        assert_eq!(shell.plans().len(), 1);

        assert!(text(shell.handle_line("/plan").await).contains("Usage: /plan"));
        assert_eq!(shell.plans().len(), 1);
    }

    #[test]
    fn test_tool_calls_need_marker() {
        assert!(tool_calls_in("read the file please").is_empty());
        assert_eq!(tool_calls_in("tool: list_files")[0].name, "list_files");
    }
}
