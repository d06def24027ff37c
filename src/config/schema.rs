//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files;
//! every field has a default so minimal configs work.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Maximum request body size in megabytes (0 = unlimited).
    pub max_request_size: u64,

    /// HTTP status code used for internal worker/transport faults.
    pub internal_error_code: u16,

    /// Emit the extended access-log line per request.
    pub access_logs: bool,

    /// Parse url-encoded/JSON bodies into the data tree instead of passing
    /// them through raw.
    pub parse_body: bool,

    /// Debug mode: run against the echo executor instead of a worker pool.
    pub debug: bool,

    /// Upload policy.
    pub uploads: UploadsConfig,

    /// Proxy addresses whose X-Forwarded-For is trusted.
    pub trusted_proxies: Vec<String>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            max_request_size: 1024,
            internal_error_code: 500,
            access_logs: false,
            parse_body: false,
            debug: false,
            uploads: UploadsConfig::default(),
            trusted_proxies: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upload storage and extension rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadsConfig {
    /// Directory receiving temporary upload files.
    pub dir: String,

    /// Allow-list of extensions; non-empty means default-deny.
    pub allowed: Vec<String>,

    /// Deny-list of extensions; checked before the allow-list.
    pub forbidden: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().to_string_lossy().into_owned(),
            allowed: Vec::new(),
            forbidden: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the metrics/admin endpoint.
    pub metrics_enabled: bool,

    /// Metrics/admin endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
