//! Backup CLI commands: create, list, restore, cleanup.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use dialoguer::Confirm;

use super::output::{header, info, new_table, print_json};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Snapshot provider configurations and health records.
    Create {
        /// Appended to the backup file name.
        #[arg(long)]
        label: Option<String>,
    },

    /// List backups, newest first.
    #[command(alias = "ls")]
    List,

    /// Replace current configurations and health records with a backup.
    Restore {
        /// Backup file path, or a file name inside the backups directory.
        path: PathBuf,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Delete backups older than the retention period.
    Cleanup {
        /// Keep backups newer than this many days (defaults to `backup_retention_days`).
        #[arg(long)]
        keep_days: Option<u32>,
    },
}

pub async fn handle_backup_command(cmd: BackupCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        BackupCommand::Create { label } => backup_create(state, label.as_deref(), json).await,
        BackupCommand::List => backup_list(state, json).await,
        BackupCommand::Restore { path, force } => backup_restore(state, path, force, json).await,
        BackupCommand::Cleanup { keep_days } => {
            let keep_days = keep_days.unwrap_or(state.global.backup_retention_days);
            backup_cleanup(state, keep_days, json).await
        }
    }
}

async fn backup_create(state: &AppState, label: Option<&str>, json: bool) -> Result<()> {
    let backup = state.service.create_backup(label).await?;
    if json {
        return print_json(&backup);
    }
    println!(
        "  {} Backup written to {}",
        style("+").green().bold(),
        style(backup.path.display()).cyan()
    );
    Ok(())
}

async fn backup_list(state: &AppState, json: bool) -> Result<()> {
    let backups = state.service.list_backups().await?;
    if json {
        return print_json(&backups);
    }
    if backups.is_empty() {
        info(format!(
            "No backups yet. Use {} to create one.",
            style("sophia backup create").cyan()
        ));
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(header(&["Created (UTC)", "Label", "Size", "File"]));
    for backup in &backups {
        let file = backup
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(backup.timestamp.format("%Y-%m-%d %H:%M:%S")).fg(Color::Cyan),
            Cell::new(backup.label.as_deref().unwrap_or("-")).fg(Color::White),
            Cell::new(format_size(backup.size_bytes)).fg(Color::DarkGrey),
            Cell::new(file).fg(Color::DarkGrey),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn backup_restore(state: &AppState, path: PathBuf, force: bool, json: bool) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Replace current provider configurations with {}?",
                path.display()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let snapshot = state.service.restore_backup(&path).await?;
    if json {
        return print_json(&serde_json::json!({
            "restored": path,
            "timestamp": snapshot.timestamp,
            "providers": snapshot.configurations.keys().collect::<Vec<_>>(),
        }));
    }
    println!(
        "  {} Restored {} provider{} from {}",
        style("✓").green().bold(),
        snapshot.configurations.len(),
        if snapshot.configurations.len() == 1 { "" } else { "s" },
        style(snapshot.timestamp.format("%Y-%m-%d %H:%M:%S")).cyan()
    );
    Ok(())
}

async fn backup_cleanup(state: &AppState, keep_days: u32, json: bool) -> Result<()> {
    let removed = state.service.cleanup_old_backups(keep_days).await?;
    if json {
        return print_json(&serde_json::json!({"removed": removed, "keep_days": keep_days}));
    }
    println!(
        "  {} Removed {removed} backup{} older than {keep_days} days.",
        style("x").red().bold(),
        if removed == 1 { "" } else { "s" }
    );
    Ok(())
}

fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= 1024 * 1024 => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
        b if b >= 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{b} B"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
