//! Layertone CLI - offline layer renderer

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use layertone::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    debug!("Layertone v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Render(args)) => commands::render(&args).await,
        Some(Commands::Curve { amount, samples }) => commands::curve(amount, samples),
        None => {
            println!("Layertone v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}
