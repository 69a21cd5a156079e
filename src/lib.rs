//! AiCode - compact terminal coding assistant for OpenAI-compatible endpoints
//!
//! Adds a line-oriented `TOOL: name key=value` protocol on top of a plain chat
//! loop, letting the operator (and optionally the model) read and write files,
//! run shell commands, list directories and inspect Python source.
//!
//! This library exposes the core for both the CLI binary and integration
//! testing.

pub mod analyzer;
pub mod config;
pub mod context;
pub mod custom_tools;
pub mod plan;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod shell;
pub mod tool_intercept;
pub mod tools;
