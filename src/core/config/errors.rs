//! Configuration error types and validation traits.

use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A referenced file does not exist.
    #[error("path does not exist: {path}")]
    PathNotFound { path: std::path::PathBuf },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration: {message}")]
    Parse { message: String },
}

/// A trait for validating configuration parameters.
///
/// Implementors usually get `validate` from [`impl_config_validator!`](crate::impl_config_validator)
/// and may call the provided helpers for anything the macro does not cover.
pub trait ConfigValidator {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Checks that a file path exists and is a regular file.
    fn validate_file_path(&self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            Err(ConfigError::PathNotFound {
                path: path.to_path_buf(),
            })
        } else if !path.is_file() {
            Err(ConfigError::InvalidConfig {
                message: format!("path is not a file: {}", path.display()),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyConfig;

    impl ConfigValidator for EmptyConfig {
        fn validate(&self) -> Result<(), ConfigError> {
            Ok(())
        }
    }

    #[test]
    fn test_file_path_validation() {
        let config = EmptyConfig;
        let missing = Path::new("/definitely/not/here/model.onnx");
        assert!(matches!(
            config.validate_file_path(missing),
            Err(ConfigError::PathNotFound { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            config.validate_file_path(dir.path()),
            Err(ConfigError::InvalidConfig { .. })
        ));
    }
}
