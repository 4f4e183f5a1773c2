//! Data directory layout for Sophia.

use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "SOPHIA_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `SOPHIA_DATA_DIR` environment variable
/// 2. `~/.sophia`
/// 3. `.sophia` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".sophia");
    }

    PathBuf::from(".sophia")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-sophia");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-sophia"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
        assert!(resolve_data_dir().ends_with(".sophia"));
    }
}
