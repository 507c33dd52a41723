//! Gatekeep CLI binary entry point.

use clap::Parser;
use gatekeep::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GATEKEEP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.engine_config() {
        Ok(config) => match cli.command {
            Commands::Chat(args) => gatekeep::cli::chat::handle_chat(config, args).await,
            Commands::Models(args) => gatekeep::cli::models::handle_models(config, args).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
