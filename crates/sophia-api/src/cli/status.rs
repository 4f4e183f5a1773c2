//! System status dashboard command.

use anyhow::Result;
use console::style;

use sophia_types::provider::HealthStatus;

use super::provider::print_health_table;
use crate::state::AppState;

/// Show configured providers, their last known health, the active selection
/// and where state lives on disk. Makes no network calls.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let configs = state.service.list_configurations().await;
    let health = state.service.health_records().await;
    let active = state.service.active_provider().await;
    let backups = state.service.list_backups().await?;

    let enabled = configs.iter().filter(|c| c.enabled).count();
    let healthy = health.values().filter(|h| h.status == HealthStatus::Healthy).count();
    let missing_keys: Vec<String> = configs
        .iter()
        .filter(|c| c.provider.requires_api_key() && !c.has_api_key())
        .map(|c| c.name())
        .collect();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "providers": {
                "total": configs.len(),
                "enabled": enabled,
                "healthy": healthy,
                "missing_keys": missing_keys,
            },
            "active": active,
            "health": health,
            "backups": backups.len(),
            "latest_backup": backups.first().map(|b| b.timestamp),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Sophia v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Providers ──").dim());
    println!("  Configured: {}", style(configs.len()).bold());
    println!("  Enabled:    {}", style(enabled).green());
    println!("  Healthy:    {}", style(healthy).green());
    if !missing_keys.is_empty() {
        println!("  Missing key: {}", style(missing_keys.join(", ")).yellow());
    }
    match &active {
        Some(active) => println!(
            "  Active:     {}{}",
            style(&active.provider).cyan(),
            active
                .model
                .as_deref()
                .map(|m| format!(" ({m})"))
                .unwrap_or_default()
        ),
        None => println!("  Active:     {}", style("none").dim()),
    }
    println!();

    if !health.is_empty() {
        println!("  {}", style("── Last Health Check ──").dim());
        print_health_table(&health);
        println!();
    }

    println!("  {}", style("── Backups ──").dim());
    println!("  Stored: {}", style(backups.len()).bold());
    if let Some(latest) = backups.first() {
        println!(
            "  Latest: {}",
            style(latest.timestamp.format("%Y-%m-%d %H:%M:%S UTC")).dim()
        );
    }
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!(
        "  Retention: {} days, health interval: {}s",
        state.global.backup_retention_days, state.global.health_check_interval_secs
    );
    println!();

    Ok(())
}
