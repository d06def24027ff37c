//! Configuration validation.
//!
//! Semantic checks on top of serde's syntactic ones. Pure function, returns
//! all validation errors rather than stopping at the first.

use std::net::IpAddr;

use crate::config::schema::GatewayConfig;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a valid socket address")]
    BindAddress(String),
    #[error("internal_error_code {0} is outside the valid HTTP range")]
    InternalErrorCode(u16),
    #[error("uploads.dir must not be empty")]
    EmptyUploadDir,
    #[error("trusted proxy `{0}` is not a valid IP address")]
    TrustedProxy(String),
    #[error("observability.metrics_address `{0}` is not a valid socket address")]
    MetricsAddress(String),
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config
        .listener
        .bind_address
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if !(100..=599).contains(&config.internal_error_code) {
        errors.push(ValidationError::InternalErrorCode(
            config.internal_error_code,
        ));
    }

    if config.uploads.dir.is_empty() {
        errors.push(ValidationError::EmptyUploadDir);
    }

    for proxy in &config.trusted_proxies {
        if proxy.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::TrustedProxy(proxy.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
