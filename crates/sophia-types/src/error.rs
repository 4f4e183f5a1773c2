use thiserror::Error;

/// Errors related to provider configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("provider '{0}' is not configured")]
    NotFound(String),

    #[error("provider '{0}' is already configured")]
    AlreadyExists(String),

    #[error("provider '{0}' is not configured")]
    NotConfigured(String),

    #[error("provider '{0}' is disabled")]
    Disabled(String),

    #[error("unknown provider: '{0}'")]
    UnknownProvider(String),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_display() {
        let err = ConfigError::OutOfRange {
            field: "timeout",
            value: 0,
            min: 1,
            max: 300,
        };
        assert_eq!(err.to_string(), "timeout must be between 1 and 300, got 0");
    }

    #[test]
    fn test_disabled_display() {
        let err = ConfigError::Disabled("gemini".to_string());
        assert_eq!(err.to_string(), "provider 'gemini' is disabled");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(ConfigError::from(io), ConfigError::Storage(_)));
    }
}
