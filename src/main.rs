//! AiCode - compact terminal coding assistant
//!
//! Interactive shell plus one-shot subcommands for tools, analysis and
//! endpoint checks.

use aicode::analyzer;
use aicode::config::{self, AppConfig};
use aicode::custom_tools::CustomToolCatalog;
use aicode::providers::{CompletionBackend, CompletionClient};
use aicode::shell::{run_interactive, Shell};
use aicode::tool_intercept::{execute_invocations, format_tool_results, parse_tool_calls};
use aicode::tools::ToolRegistry;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "aicode")]
#[command(author, version, about = "Compact terminal coding assistant for local models")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive shell (default)
    Chat {
        /// Model profile name or endpoint URL
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Write a starter configuration to .aicode/config.yaml
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Summarize a Python file
    Analyze {
        /// File to analyze
        file: PathBuf,
    },

    /// Execute every TOOL: invocation in the given text
    Tool {
        /// Text such as "TOOL: list_files path=src"
        text: String,
    },

    /// List model profiles and check connectivity
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "aicode=debug"
    } else {
        "aicode=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command.unwrap_or(Commands::Chat { model: None }) {
        Commands::Chat { model } => cmd_chat(model).await,
        Commands::Init { force } => cmd_init(force),
        Commands::Config => cmd_config(),
        Commands::Analyze { file } => cmd_analyze(&file),
        Commands::Tool { text } => cmd_tool(&text).await,
        Commands::Models => cmd_models().await,
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    config::load_config().context("Failed to load configuration")
}

async fn cmd_chat(model: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;
    let shell = Shell::new(config, model.as_deref());
    info!(model = %shell.session().active_model(), "Starting shell");
    run_interactive(shell).await
}

/// Initialize AiCode configuration
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_file = PathBuf::from(".aicode/config.yaml");
    if !config::write_default_config(&config_file, force)
        .with_context(|| format!("Failed to write {}", config_file.display()))?
    {
        warn!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }
    println!("Created {}", config_file.display());
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config()?;
    println!("AiCode Configuration\n");
    for line in config.masked_summary() {
        println!("  {}", line);
    }
    Ok(())
}

fn cmd_analyze(file: &Path) -> anyhow::Result<()> {
    let analysis = analyzer::analyze_file(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    println!("{}", analysis);
    Ok(())
}

async fn cmd_tool(text: &str) -> anyhow::Result<()> {
    let calls = parse_tool_calls(text);
    if calls.is_empty() {
        bail!("No TOOL: invocation found in input");
    }

    let config = load_config()?;
    let catalog = CustomToolCatalog::load(&config.paths.custom_tools_file)
        .context("Failed to load custom tools")?;
    let registry = ToolRegistry::new().with_catalog(&catalog);

    let results = execute_invocations(&registry, &calls).await;
    println!("{}", format_tool_results(&results));
    Ok(())
}

async fn cmd_models() -> anyhow::Result<()> {
    let config = load_config()?;
    println!("Models (default: {})\n", config.shell.default_model);
    for name in config.model_names() {
        let client = CompletionClient::new(config.resolve_profile(name));
        let status = match client.ping().await {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("FAILED: {}", e),
        };
        println!("  {} - {} ... {}", name, client.profile().endpoint, status);
    }
    Ok(())
}
