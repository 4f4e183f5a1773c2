//! CLI command definitions for the `sophia` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! noun (`sophia provider add`, `sophia backup list`) plus the top-level
//! `ask` and `status`.

pub mod ask;
pub mod backup;
pub mod output;
pub mod provider;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Talk to several LLM vendors through one interface.
#[derive(Parser)]
#[command(name = "sophia", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 if self.is_watch() => "warn,sophia_core=info",
            0 => "warn",
            1 => "info,sophia=debug",
            _ => "trace",
        }
    }

    // `provider watch` reports each round through the log.
    fn is_watch(&self) -> bool {
        matches!(
            self.command,
            Commands::Provider {
                action: provider::ProviderCommand::Watch { .. }
            }
        )
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage provider configurations and health.
    Provider {
        #[command(subcommand)]
        action: provider::ProviderCommand,
    },

    /// Create, list, restore and prune configuration backups.
    Backup {
        #[command(subcommand)]
        action: backup::BackupCommand,
    },

    /// Send a prompt through the configured providers.
    Ask(ask::AskArgs),

    /// Overview of configured providers, health and the active selection.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_and_filter() {
        let cli = Cli::parse_from(["sophia", "status", "--json", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.log_filter(), "trace");

        let cli = Cli::parse_from(["sophia", "--quiet", "status"]);
        assert_eq!(cli.log_filter(), "error");

        let cli = Cli::parse_from(["sophia", "provider", "watch", "--interval", "5"]);
        assert_eq!(cli.log_filter(), "warn,sophia_core=info");
    }

    #[test]
    fn test_ask_arguments() {
        let cli = Cli::parse_from([
            "sophia",
            "ask",
            "What is Rust?",
            "--prefer",
            "anthropic",
            "--max-tokens",
            "200",
            "--stream",
        ]);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.prompt, vec!["What is Rust?".to_string()]);
        assert_eq!(args.prefer.as_deref(), Some("anthropic"));
        assert_eq!(args.max_tokens, Some(200));
        assert!(args.stream);
        assert!(args.consensus.is_none());
    }

    #[test]
    fn test_consensus_without_count_uses_default_marker() {
        let cli = Cli::parse_from(["sophia", "ask", "hi", "--consensus"]);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.consensus, Some(None));

        let cli = Cli::parse_from(["sophia", "ask", "hi", "--consensus", "3"]);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.consensus, Some(Some(3)));
    }

    #[test]
    fn test_provider_add_parses_kind() {
        let cli = Cli::parse_from([
            "sophia", "provider", "add", "openrouter", "--api-key", "sk-or", "--priority", "2",
        ]);
        let Commands::Provider {
            action: provider::ProviderCommand::Add(args),
        } = cli.command
        else {
            panic!("expected provider add");
        };
        assert_eq!(args.kind, sophia_types::provider::ProviderKind::OpenRouter);
        assert_eq!(args.priority, 2);
        assert!(Cli::try_parse_from(["sophia", "provider", "add", "bedrock"]).is_err());
    }
}
