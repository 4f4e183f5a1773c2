//! Shared rendering helpers for CLI commands.

use std::time::Duration;

use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use sophia_types::provider::{HealthStatus, ProviderConfiguration, ProviderHealth};

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Show only the last four characters of a key.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// JSON view of a configuration with the API key masked.
pub fn config_json(config: &ProviderConfiguration) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("name".to_string(), config.name().into());
        if let Some(key) = &config.api_key {
            obj.insert("api_key".to_string(), mask_key(key).into());
        }
    }
    value
}

pub fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header(labels: &[&str]) -> Vec<Cell> {
    labels.iter().map(|l| Cell::new(l).fg(Color::White)).collect()
}

pub fn health_cell(health: Option<&ProviderHealth>) -> Cell {
    match health.map(|h| h.status) {
        Some(HealthStatus::Healthy) => Cell::new("healthy").fg(Color::Green),
        Some(HealthStatus::Unavailable) => Cell::new("unavailable").fg(Color::Red),
        Some(HealthStatus::Unconfigured) | None => Cell::new("unchecked").fg(Color::DarkGrey),
    }
}

pub fn enabled_cell(enabled: bool) -> Cell {
    if enabled {
        Cell::new("yes").fg(Color::Green)
    } else {
        Cell::new("no").fg(Color::Red)
    }
}

/// Shorten to `max` characters with a trailing ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

pub fn check_mark(ok: bool) -> String {
    if ok {
        format!("{}", style("✓").green())
    } else {
        format!("{}", style("✗").red())
    }
}

/// Spinner on stderr; hidden when output is JSON or quiet.
pub fn spinner(message: impl Into<String>, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

pub fn info(message: impl std::fmt::Display) {
    println!("  {} {message}", style("i").blue().bold());
}
