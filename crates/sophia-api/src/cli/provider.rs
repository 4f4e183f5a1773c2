//! Provider management CLI commands.
//!
//! `sophia provider ...` edits the persisted configurations in
//! `~/.sophia/providers.json`, runs health probes and records the active
//! selection.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};
use console::style;
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;

use sophia_core::llm::health::HealthMonitor;
use sophia_types::error::ConfigError;
use sophia_types::provider::{ProviderConfiguration, ProviderHealth, ProviderKind};

use super::output::{
    config_json, enabled_cell, header, health_cell, info, mask_key, new_table, print_json,
    spinner, truncate,
};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ProviderCommand {
    /// List configured providers in priority order.
    #[command(alias = "ls")]
    List,

    /// Add (or with --replace, overwrite) a provider configuration.
    Add(AddArgs),

    /// Remove a provider configuration and its health record.
    #[command(alias = "rm")]
    Remove {
        name: String,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Enable a provider.
    Enable { name: String },

    /// Disable a provider without removing it.
    Disable { name: String },

    /// Check configurations for missing keys and bad URLs.
    Validate {
        /// Validate one provider instead of all.
        name: Option<String>,
    },

    /// Probe providers and record the result.
    Health {
        /// Check one provider instead of all.
        name: Option<String>,
    },

    /// Re-check every provider periodically until Ctrl+C.
    Watch {
        /// Seconds between rounds (defaults to `health_check_interval_secs`).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Make a provider (and optionally a model) the default for `ask`.
    Activate {
        name: String,

        #[arg(long)]
        model: Option<String>,
    },

    /// Create or update providers from API key environment variables.
    #[command(name = "sync-env")]
    SyncEnv,
}

#[derive(Args)]
pub struct AddArgs {
    /// Vendor: ollama, openai, anthropic, gemini, openrouter.
    pub kind: ProviderKind,

    /// API key. Falls back to the vendor's environment variable.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Override the vendor's default endpoint.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Default model for requests that name none.
    #[arg(long)]
    pub model: Option<String>,

    /// Lower is tried first.
    #[arg(long, default_value = "10")]
    pub priority: i32,

    /// Per-call timeout in seconds (1-300).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries for transient failures (0-10).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Free-form tag; repeatable.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Store the configuration disabled.
    #[arg(long)]
    pub disabled: bool,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub replace: bool,

    /// Probe the provider after saving.
    #[arg(long)]
    pub check: bool,
}

pub async fn handle_provider_command(cmd: ProviderCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ProviderCommand::List => provider_list(state, json).await,
        ProviderCommand::Add(args) => provider_add(state, args, json).await,
        ProviderCommand::Remove { name, force } => provider_remove(state, &name, force, json).await,
        ProviderCommand::Enable { name } => provider_set_enabled(state, &name, true, json).await,
        ProviderCommand::Disable { name } => provider_set_enabled(state, &name, false, json).await,
        ProviderCommand::Validate { name } => provider_validate(state, name.as_deref(), json).await,
        ProviderCommand::Health { name } => provider_health(state, name.as_deref(), json).await,
        ProviderCommand::Watch { interval } => provider_watch(state, interval, json).await,
        ProviderCommand::Activate { name, model } => provider_activate(state, &name, model, json).await,
        ProviderCommand::SyncEnv => provider_sync_env(state, json).await,
    }
}

async fn provider_list(state: &AppState, json: bool) -> Result<()> {
    let configs = state.service.list_configurations().await;
    let health = state.service.health_records().await;
    let active = state.service.active_provider().await;

    if json {
        let items: Vec<_> = configs.iter().map(config_json).collect();
        return print_json(&items);
    }

    if configs.is_empty() {
        println!();
        info(format!(
            "No providers configured. Use {} or {} to add one.",
            style("sophia provider add").cyan(),
            style("sophia provider sync-env").cyan()
        ));
        println!();
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(header(&[
        "Priority", "Name", "Model", "Endpoint", "Key", "Enabled", "Health",
    ]));

    for config in &configs {
        let name = config.name();
        let is_active = active.as_ref().is_some_and(|a| a.provider == name);
        let name_cell = if is_active {
            Cell::new(format!("{name} *")).fg(Color::Cyan)
        } else {
            Cell::new(&name).fg(Color::White)
        };
        let key = match &config.api_key {
            Some(key) => mask_key(key),
            None if config.provider.requires_api_key() => "missing".to_string(),
            None => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(config.priority).fg(Color::Cyan),
            name_cell,
            Cell::new(config.effective_model()).fg(Color::DarkGrey),
            Cell::new(config.effective_base_url()).fg(Color::DarkGrey),
            Cell::new(key).fg(Color::DarkGrey),
            enabled_cell(config.enabled),
            health_cell(health.get(&name)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} provider{}{}",
        style(configs.len()).bold(),
        if configs.len() == 1 { "" } else { "s" },
        if active.is_some() { ", * = active" } else { "" }
    );
    println!();
    Ok(())
}

/// Build the configuration `provider add` will store.
pub fn configuration_from_args(
    args: &AddArgs,
    defaults: &sophia_types::config::GlobalConfig,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ProviderConfiguration> {
    let kind = args.kind;
    let mut config = ProviderConfiguration::new(kind)
        .with_priority(args.priority)
        .with_enabled(!args.disabled)
        .with_timeout(args.timeout.unwrap_or(defaults.default_timeout_secs))?
        .with_max_retries(args.max_retries.unwrap_or(defaults.default_max_retries))?;

    let api_key = args.api_key.clone().or_else(|| {
        kind.requires_api_key()
            .then(|| env_lookup(kind.api_key_env_var()))
            .flatten()
    });
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        config = config.with_api_key(key.trim());
    }

    let base_url = args.base_url.clone().or_else(|| {
        (!kind.requires_api_key())
            .then(|| env_lookup(kind.api_key_env_var()))
            .flatten()
    });
    if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
        config = config.with_base_url(url.trim());
    }
    if let Some(model) = &args.model {
        config = config.with_default_model(model);
    }
    for tag in &args.tags {
        config = config.with_tag(tag);
    }
    Ok(config)
}

async fn provider_add(state: &AppState, args: AddArgs, json: bool) -> Result<()> {
    let config = configuration_from_args(&args, &state.global, |var| std::env::var(var).ok())?;
    let name = config.name();

    let saved = if args.replace {
        state.service.upsert_configuration(config).await?
    } else {
        match state.service.create_configuration(config).await {
            Ok(saved) => saved,
            Err(err @ ConfigError::AlreadyExists(_)) => {
                return Err(anyhow::Error::new(err).context(format!(
                    "Use `sophia provider add {name} --replace` to overwrite it"
                )));
            }
            Err(err) => return Err(err.into()),
        }
    };

    let violations = violations_for(state, &name).await?;
    let health = if args.check {
        let sp = spinner(format!("Checking {name}..."), json);
        let health = state.service.check_provider_health(&name).await?;
        sp.finish_and_clear();
        Some(health)
    } else {
        None
    };

    if json {
        return print_json(&serde_json::json!({
            "provider": config_json(&saved),
            "violations": violations,
            "health": health,
        }));
    }

    println!(
        "  {} Provider '{}' saved (priority {}, model: {}).",
        style("+").green().bold(),
        style(&name).cyan(),
        saved.priority,
        saved.effective_model()
    );
    for violation in &violations {
        println!("  {} {violation}", style("!").yellow().bold());
    }
    if let Some(health) = health {
        print_health_line(&health);
    }
    Ok(())
}

async fn violations_for(state: &AppState, name: &str) -> Result<Vec<String>> {
    Ok(state.service.validate_configuration(name).await?)
}

async fn provider_remove(state: &AppState, name: &str, force: bool, json: bool) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove provider '{name}'?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let removed = state.service.delete_configuration(name).await?;

    if json {
        return print_json(&serde_json::json!({"removed": removed, "provider": name}));
    }
    if removed {
        println!(
            "  {} Provider '{}' removed.",
            style("x").red().bold(),
            style(name).cyan()
        );
    } else {
        println!(
            "  {} Provider '{}' was not configured.",
            style("?").yellow().bold(),
            style(name).cyan()
        );
    }
    Ok(())
}

async fn provider_set_enabled(state: &AppState, name: &str, enabled: bool, json: bool) -> Result<()> {
    let config = state.service.set_enabled(name, enabled).await?;
    if json {
        return print_json(&config_json(&config));
    }
    println!(
        "  {} Provider '{}' {}.",
        style("•").bold(),
        style(name).cyan(),
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn provider_validate(state: &AppState, name: Option<&str>, json: bool) -> Result<()> {
    let results: BTreeMap<String, Vec<String>> = match name {
        Some(name) => BTreeMap::from([(name.to_string(), violations_for(state, name).await?)]),
        None => state.service.validate_all_configurations().await,
    };
    let invalid = results.values().filter(|v| !v.is_empty()).count();

    if json {
        print_json(&results)?;
    } else if results.is_empty() {
        info("No providers configured.");
    } else {
        println!();
        for (provider, violations) in &results {
            if violations.is_empty() {
                println!("  {} {}", style("✓").green(), style(provider).cyan());
            } else {
                println!("  {} {}", style("✗").red(), style(provider).cyan());
                for violation in violations {
                    println!("      {}", style(violation).dim());
                }
            }
        }
        println!();
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} provider configuration(s) are invalid");
    }
    Ok(())
}

async fn provider_health(state: &AppState, name: Option<&str>, json: bool) -> Result<()> {
    let sp = spinner("Checking providers...", json);
    let results: BTreeMap<String, ProviderHealth> = match name {
        Some(name) => {
            let health = state.service.check_provider_health(name).await?;
            BTreeMap::from([(name.to_string(), health)])
        }
        None => state.service.check_all_providers_health().await?,
    };
    sp.finish_and_clear();

    if json {
        return print_json(&results);
    }
    if results.is_empty() {
        info("No providers configured.");
        return Ok(());
    }
    println!();
    print_health_table(&results);
    println!();
    Ok(())
}

fn print_health_line(health: &ProviderHealth) {
    let detail = match (&health.error_message, health.response_time) {
        (Some(err), _) => err.clone(),
        (None, Some(secs)) => format!("{:.0} ms", secs * 1000.0),
        (None, None) => String::new(),
    };
    println!(
        "  {} {} {}",
        super::output::check_mark(health.is_healthy()),
        style(&health.provider).cyan(),
        style(detail).dim()
    );
}

pub fn print_health_table(records: &BTreeMap<String, ProviderHealth>) {
    let mut table = new_table();
    table.set_header(header(&[
        "Provider", "Status", "Response", "Failures", "Last Success", "Error",
    ]));
    for (name, health) in records {
        let response = health
            .response_time
            .map(|s| format!("{:.0} ms", s * 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let last_success = health
            .last_success
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let error = health.error_message.as_deref().unwrap_or("-");
        table.add_row(vec![
            Cell::new(name).fg(Color::White),
            health_cell(Some(health)),
            Cell::new(response).fg(Color::DarkGrey),
            Cell::new(format!("{}/{}", health.consecutive_failures, health.total_failures))
                .fg(Color::White),
            Cell::new(last_success).fg(Color::DarkGrey),
            Cell::new(truncate(error, 40)).fg(Color::DarkGrey),
        ]);
    }
    println!("{table}");
}

async fn provider_watch(state: &AppState, interval: Option<u64>, json: bool) -> Result<()> {
    let secs = interval.unwrap_or(state.global.health_check_interval_secs).max(1);
    let cancel = CancellationToken::new();

    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    if !json {
        println!(
            "  {} Checking providers every {secs}s. {}",
            style("⟳").bold(),
            style("Press Ctrl+C to stop").dim()
        );
    }
    HealthMonitor::run_periodic(state.service.as_ref(), Duration::from_secs(secs), cancel).await;

    let records = state.service.health_records().await;
    if json {
        return print_json(&records);
    }
    println!();
    print_health_table(&records);
    println!();
    Ok(())
}

async fn provider_activate(
    state: &AppState,
    name: &str,
    model: Option<String>,
    json: bool,
) -> Result<()> {
    let active = state.service.set_active_provider(name, model).await?;
    if json {
        return print_json(&active);
    }
    println!(
        "  {} Active provider: {}{}",
        style("★").yellow(),
        style(&active.provider).cyan(),
        active
            .model
            .as_deref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default()
    );
    Ok(())
}

async fn provider_sync_env(state: &AppState, json: bool) -> Result<()> {
    let report = state.service.sync_with_environment().await?;
    if json {
        return print_json(&serde_json::json!({
            "created": report.created,
            "updated": report.updated,
            "active": report.active,
        }));
    }
    if report.is_empty() {
        info("No provider environment variables found.");
        return Ok(());
    }
    for name in &report.created {
        println!("  {} Created '{}'", style("+").green().bold(), style(name).cyan());
    }
    for name in &report.updated {
        println!("  {} Updated '{}'", style("~").yellow().bold(), style(name).cyan());
    }
    if let Some(active) = &report.active {
        println!("  {} Active provider: {}", style("★").yellow(), style(&active.provider).cyan());
    }
    Ok(())
}
