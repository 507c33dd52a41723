//! CLI entry point for Gatekeep.

pub mod chat;
pub mod models;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::error::Result;

/// Gatekeep agent CLI
#[derive(Parser, Debug)]
#[command(name = "gatekeep", version, about = "Terminal client for approval-gated coding agents")]
pub struct Cli {
    /// TOML config file (environment variables still override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Agent server base URL
    #[arg(long, global = true)]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolve the engine configuration for this invocation.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_toml_file(path)?,
            None => EngineConfig::from_env()?,
        };
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one turn and stream it to the terminal
    Chat(ChatArgs),
    /// List models offered by the server
    Models(ModelsArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Continue an existing chat instead of creating one
    #[arg(long)]
    pub chat: Option<String>,

    /// Continue the chat used last
    #[arg(long, conflicts_with = "chat")]
    pub resume: bool,

    /// Model id (defaults to the remembered or server default model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Allow every permission request once without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// User prompt
    pub prompt: String,
}

/// Arguments for the `models` subcommand.
#[derive(Parser, Debug)]
pub struct ModelsArgs {
    /// Ignore the cached list
    #[arg(long)]
    pub refresh: bool,
}
