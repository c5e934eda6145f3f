use thiserror::Error;

/// Kiln error types
#[derive(Error, Debug)]
pub enum KilnError {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for KilnError {
    fn from(err: serde_yaml::Error) -> Self {
        KilnError::SerializationError(err.to_string())
    }
}

/// Result type alias for Kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KilnError = io_error.into();
        assert!(matches!(err, KilnError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_config_error_display() {
        let error = KilnError::ConfigError("Missing storage root".to_string());
        assert_eq!(error.to_string(), "Configuration error: Missing storage root");
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: KilnError = result.unwrap_err().into();
        assert!(matches!(err, KilnError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let err: KilnError = result.unwrap_err().into();
        assert!(matches!(err, KilnError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = KilnError::Other("Unknown error occurred".to_string());
        assert_eq!(error.to_string(), "Unknown error occurred");
    }
}
