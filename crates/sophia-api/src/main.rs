//! Sophia CLI entry point.
//!
//! Binary name: `sophia`
//!
//! Parses CLI arguments, sets up tracing, loads the configuration service
//! from the data directory, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(err) = sophia_observe::tracing_setup::init_tracing(cli.otel, cli.log_filter()) {
        eprintln!("Warning: failed to initialize tracing: {err}");
    }

    let result = run(cli).await;
    sophia_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "sophia", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Provider { action } => {
            cli::provider::handle_provider_command(action, &state, cli.json).await?;
        }
        Commands::Backup { action } => {
            cli::backup::handle_backup_command(action, &state, cli.json).await?;
        }
        Commands::Ask(args) => {
            cli::ask::ask(&state, args, cli.json, cli.quiet).await?;
        }
        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
