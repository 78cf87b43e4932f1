//! Configuration management for Windowgate.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WindowgateError};
use crate::http::GateOptions;
use crate::ratelimit::EngineConfig;

/// Prefix for environment overrides, e.g. `WINDOWGATE__RATE_LIMITING__LIMIT=50`.
const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for the Windowgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed per client per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Tracked clients above which all new traffic is refused; unbounded when unset
    #[serde(default)]
    pub max_clients: Option<usize>,

    /// Whether expired clients are swept in the background
    #[serde(default = "default_true")]
    pub sweep_enabled: bool,

    /// Background sweep interval in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Body of the 429 response
    #[serde(default = "default_error_message")]
    pub error_message: String,

    /// Whether `X-RateLimit-*` headers are attached to responses
    #[serde(default = "default_true")]
    pub show_informative_headers: bool,

    /// Request paths that bypass rate limiting
    #[serde(default)]
    pub skip_paths: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            max_clients: None,
            sweep_enabled: true,
            sweep_interval_secs: default_sweep_interval_secs(),
            error_message: default_error_message(),
            show_informative_headers: true,
            skip_paths: Vec::new(),
        }
    }
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_error_message() -> String {
    "Too many requests, please try again later".to_string()
}

fn default_true() -> bool {
    true
}

impl RateLimitingConfig {
    /// Build the validated engine settings.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig::new(self.limit)
            .with_window(Duration::from_secs(self.window_secs))
            .with_max_clients(self.max_clients.unwrap_or(usize::MAX))
            .with_sweep_enabled(self.sweep_enabled)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs));
        config.validate()?;
        Ok(config)
    }

    /// Build the HTTP gate options.
    pub fn gate_options(&self) -> GateOptions {
        GateOptions::default()
            .with_error_message(self.error_message.clone())
            .with_informative_headers(self.show_informative_headers)
            .with_skip_paths(self.skip_paths.iter().cloned())
    }
}

impl WindowgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WindowgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file layered under
    /// `WINDOWGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WindowgateConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.rate_limiting.window_secs, 60);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
        assert!(config.rate_limiting.max_clients.is_none());
        assert!(config.rate_limiting.sweep_enabled);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limiting:
  limit: 50
  window_secs: 300
  max_clients: 10000
  skip_paths:
    - /health
    - /metrics
"#;
        let config = WindowgateConfig::from_yaml(yaml).unwrap();
        let rl = &config.rate_limiting;
        assert_eq!(rl.limit, 50);
        assert_eq!(rl.window_secs, 300);
        assert_eq!(rl.max_clients, Some(10000));
        assert_eq!(rl.skip_paths, vec!["/health", "/metrics"]);
        assert!(rl.show_informative_headers);
        assert_eq!(config.server.listen_addr, default_listen_addr());
    }

    #[test]
    fn test_engine_config_conversion() {
        let rl = RateLimitingConfig {
            limit: 3,
            window_secs: 90,
            max_clients: Some(2),
            sweep_enabled: false,
            ..RateLimitingConfig::default()
        };

        let engine = rl.engine_config().unwrap();
        assert_eq!(engine.limit, 3);
        assert_eq!(engine.window, Duration::from_secs(90));
        assert_eq!(engine.max_clients, 2);
        assert!(!engine.sweep_enabled);
    }

    #[test]
    fn test_engine_config_rejects_bad_values() {
        let zero_limit = RateLimitingConfig {
            limit: 0,
            ..RateLimitingConfig::default()
        };
        assert!(matches!(
            zero_limit.engine_config(),
            Err(WindowgateError::Config(_))
        ));

        let zero_window = RateLimitingConfig {
            window_secs: 0,
            ..RateLimitingConfig::default()
        };
        assert!(zero_window.engine_config().is_err());

        let huge_window = RateLimitingConfig {
            window_secs: 10_000_000_000_000,
            ..RateLimitingConfig::default()
        };
        assert!(matches!(
            huge_window.engine_config(),
            Err(WindowgateError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        let result = WindowgateConfig::from_yaml("rate_limiting: [not, a, map]");
        assert!(matches!(result, Err(WindowgateError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("windowgate-test-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "server:\n  listen_addr: 0.0.0.0:8080\nrate_limiting:\n  limit: 7\n",
        )
        .unwrap();

        let parsed = WindowgateConfig::from_file(&path).unwrap();
        let layered = WindowgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        for config in [parsed, layered] {
            assert_eq!(config.rate_limiting.limit, 7);
            assert_eq!(config.rate_limiting.window_secs, 60);
            assert_eq!(config.server.listen_addr.port(), 8080);
        }
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = WindowgateConfig::load(None).unwrap();
        assert_eq!(config.rate_limiting.error_message, default_error_message());
    }
}
