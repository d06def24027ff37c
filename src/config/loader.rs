//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            max_request_size = 8
            internal_error_code = 503

            [uploads]
            forbidden = [".exe"]
            "#,
        )
        .unwrap();

        assert_eq!(config.max_request_size, 8);
        assert_eq!(config.internal_error_code, 503);
        assert_eq!(config.uploads.forbidden, vec![".exe"]);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(validate_config(&config).is_ok());
    }
}
