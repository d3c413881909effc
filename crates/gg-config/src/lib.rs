//! Guard Gateway Configuration
//!
//! Typed configuration loaded from TOML with environment overrides.
//! Per-service defaults are resolved once, in [`GatewayConfig::guard_services`].
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 8080
//!
//! [monitor]
//! interval_secs = 30
//! max_concurrent_checks = 10
//!
//! [defaults]
//! health_endpoint = "/health"
//! request_timeout_secs = 30
//!
//! [[services]]
//! name = "tokenguard"
//! base_url = "http://tokenguard:8001"
//! ```

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use gg_common::{
    GuardServiceConfig, DEFAULT_HEALTH_CHECK_TIMEOUT, DEFAULT_HEALTH_ENDPOINT, DEFAULT_PROCESS_ENDPOINT,
    DEFAULT_REQUEST_TIMEOUT,
};

/// Guard services registered when no configuration file is supplied
pub const DEFAULT_GUARDS: [(&str, u16); 5] = [
    ("tokenguard", 8001),
    ("trustguard", 8002),
    ("contextguard", 8003),
    ("biasguard", 8004),
    ("healthguard", 8005),
];

const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between sweeps
    pub interval_secs: f64,
    /// Maximum health checks in flight at once
    pub max_concurrent_checks: usize,
    /// How long stop() waits for an in-flight sweep
    pub stop_grace_secs: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_MONITOR_INTERVAL.as_secs_f64(),
            max_concurrent_checks: 10,
            stop_grace_secs: DEFAULT_STOP_GRACE.as_secs_f64(),
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        secs_or(self.interval_secs, DEFAULT_MONITOR_INTERVAL)
    }

    pub fn stop_grace(&self) -> Duration {
        secs_or(self.stop_grace_secs, DEFAULT_STOP_GRACE)
    }
}

/// Defaults applied to every service that does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefaults {
    pub health_endpoint: String,
    pub process_endpoint: String,
    pub health_check_timeout_secs: f64,
    pub request_timeout_secs: f64,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            health_endpoint: DEFAULT_HEALTH_ENDPOINT.to_string(),
            process_endpoint: DEFAULT_PROCESS_ENDPOINT.to_string(),
            health_check_timeout_secs: 5.0,
            request_timeout_secs: 30.0,
        }
    }
}

/// One `[[services]]` entry as written in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub health_endpoint: Option<String>,
    #[serde(default)]
    pub process_endpoint: Option<String>,
    #[serde(default)]
    pub health_check_timeout_secs: Option<f64>,
    #[serde(default)]
    pub request_timeout_secs: Option<f64>,
}

impl ServiceEntry {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            health_endpoint: None,
            process_endpoint: None,
            health_check_timeout_secs: None,
            request_timeout_secs: None,
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub defaults: ServiceDefaults,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            monitor: MonitorSettings::default(),
            defaults: ServiceDefaults::default(),
            services: DEFAULT_GUARDS
                .iter()
                .map(|(name, port)| ServiceEntry::new(*name, format!("http://localhost:{}", port)))
                .collect(),
        }
    }
}

impl GatewayConfig {
    /// Parse configuration from a TOML string and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            services = config.services.len(),
            "Loaded gateway configuration"
        );
        Ok(config)
    }

    /// Load from `path` when the file exists, otherwise fall back to the built-in defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply overrides from process environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// Recognised keys: `GUARD_GATEWAY_BIND`, `GUARD_GATEWAY_PORT`,
    /// `GUARD_GATEWAY_HEALTH_INTERVAL`, `GUARD_GATEWAY_MAX_CONCURRENT_CHECKS`
    /// and `<SERVICE>_URL` per registered service (e.g. `TOKENGUARD_URL`).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("GUARD_GATEWAY_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("GUARD_GATEWAY_PORT") {
            self.server.port = parse_override("GUARD_GATEWAY_PORT", &port)?;
        }
        if let Some(interval) = lookup("GUARD_GATEWAY_HEALTH_INTERVAL") {
            self.monitor.interval_secs = parse_override("GUARD_GATEWAY_HEALTH_INTERVAL", &interval)?;
        }
        if let Some(limit) = lookup("GUARD_GATEWAY_MAX_CONCURRENT_CHECKS") {
            self.monitor.max_concurrent_checks =
                parse_override("GUARD_GATEWAY_MAX_CONCURRENT_CHECKS", &limit)?;
        }

        for service in &mut self.services {
            let key = format!("{}_URL", service.name.to_uppercase().replace('-', "_"));
            if let Some(url) = lookup(&key) {
                debug!(service = %service.name, url = %url, "Base URL overridden from environment");
                service.base_url = url;
            }
        }

        self.validate()
    }

    /// Check every value that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        check_duration("monitor.interval_secs", self.monitor.interval_secs)?;
        check_duration("monitor.stop_grace_secs", self.monitor.stop_grace_secs)?;
        if self.monitor.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid(
                "monitor.max_concurrent_checks must be at least 1".to_string(),
            ));
        }
        check_duration("defaults.health_check_timeout_secs", self.defaults.health_check_timeout_secs)?;
        check_duration("defaults.request_timeout_secs", self.defaults.request_timeout_secs)?;

        if self.services.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[services]] entry is required".to_string(),
            ));
        }

        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(ConfigError::Invalid("service name must not be empty".to_string()));
            }
            let url = service.base_url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "service {}: base_url must start with http:// or https://, got '{}'",
                    service.name, service.base_url
                )));
            }
            if let Some(t) = service.health_check_timeout_secs {
                check_duration(&format!("services.{}.health_check_timeout_secs", service.name), t)?;
            }
            if let Some(t) = service.request_timeout_secs {
                check_duration(&format!("services.{}.request_timeout_secs", service.name), t)?;
            }
        }

        Ok(())
    }

    /// Resolve every service entry against the defaults
    pub fn guard_services(&self) -> Vec<GuardServiceConfig> {
        self.services
            .iter()
            .map(|entry| {
                let defaults = &self.defaults;
                GuardServiceConfig::new(entry.name.trim(), entry.base_url.as_str())
                    .with_health_endpoint(
                        entry.health_endpoint.as_deref().unwrap_or(&defaults.health_endpoint),
                    )
                    .with_process_endpoint(
                        entry.process_endpoint.as_deref().unwrap_or(&defaults.process_endpoint),
                    )
                    .with_health_check_timeout(secs_or(
                        entry.health_check_timeout_secs.unwrap_or(defaults.health_check_timeout_secs),
                        DEFAULT_HEALTH_CHECK_TIMEOUT,
                    ))
                    .with_request_timeout(secs_or(
                        entry.request_timeout_secs.unwrap_or(defaults.request_timeout_secs),
                        DEFAULT_REQUEST_TIMEOUT,
                    ))
            })
            .collect()
    }
}

/// Seconds as a non-zero `Duration`, or None when the value cannot be represented
fn positive_duration(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok().filter(|d| !d.is_zero())
}

/// Validated values always convert; the fallback only covers fields mutated after `validate()`
fn secs_or(value: f64, fallback: Duration) -> Duration {
    positive_duration(value).unwrap_or(fallback)
}

fn check_duration(field: &str, value: f64) -> Result<Duration> {
    positive_duration(value).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{} must be a positive number of seconds representable as a duration, got {}",
            field, value
        ))
    })
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_registers_all_guards() {
        let config = GatewayConfig::default();
        let services = config.guard_services();

        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["tokenguard", "trustguard", "contextguard", "biasguard", "healthguard"]);
        assert_eq!(services[0].health_url(), "http://localhost:8001/health");
        assert_eq!(services[4].process_url(), "http://localhost:8005/process");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_resolved_once_with_overrides() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [defaults]
            health_endpoint = "/api/health"
            request_timeout_secs = 12

            [[services]]
            name = "tokenguard"
            base_url = "http://tokenguard:8001/"

            [[services]]
            name = "biasguard"
            base_url = "http://biasguard:8004"
            health_endpoint = "/status"
            health_check_timeout_secs = 1.5
            request_timeout_secs = 60
            "#,
        )
        .unwrap();

        let services = config.guard_services();
        assert_eq!(services[0].health_url(), "http://tokenguard:8001/api/health");
        assert_eq!(services[0].request_timeout, Duration::from_secs(12));
        assert_eq!(services[0].health_check_timeout, Duration::from_secs(5));
        assert_eq!(services[1].health_url(), "http://biasguard:8004/status");
        assert_eq!(services[1].health_check_timeout, Duration::from_millis(1500));
        assert_eq!(services[1].request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let bad_url = GatewayConfig::from_toml_str(
            r#"
            [[services]]
            name = "tokenguard"
            base_url = "tokenguard:8001"
            "#,
        );
        assert!(matches!(bad_url, Err(ConfigError::Invalid(_))));

        let zero_limit = GatewayConfig::from_toml_str(
            r#"
            [monitor]
            max_concurrent_checks = 0

            [[services]]
            name = "tokenguard"
            base_url = "http://tokenguard:8001"
            "#,
        );
        assert!(matches!(zero_limit, Err(ConfigError::Invalid(_))));

        let negative_timeout = GatewayConfig::from_toml_str(
            r#"
            [[services]]
            name = "trustguard"
            base_url = "http://trustguard:8002"
            request_timeout_secs = -1
            "#,
        );
        assert!(matches!(negative_timeout, Err(ConfigError::Invalid(_))));

        let not_toml = GatewayConfig::from_toml_str("[[services");
        assert!(matches!(not_toml, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_rejects_durations_that_round_to_zero_or_overflow() {
        let tiny_interval = GatewayConfig::from_toml_str(
            r#"
            [monitor]
            interval_secs = 1e-12

            [[services]]
            name = "tokenguard"
            base_url = "http://tokenguard:8001"
            "#,
        );
        assert!(matches!(tiny_interval, Err(ConfigError::Invalid(msg)) if msg.contains("monitor.interval_secs")));

        let huge_timeout = GatewayConfig::from_toml_str(
            r#"
            [defaults]
            request_timeout_secs = 1e30

            [[services]]
            name = "tokenguard"
            base_url = "http://tokenguard:8001"
            "#,
        );
        assert!(matches!(huge_timeout, Err(ConfigError::Invalid(msg)) if msg.contains("defaults.request_timeout_secs")));

        let tiny_health_timeout = GatewayConfig::from_toml_str(
            r#"
            [[services]]
            name = "biasguard"
            base_url = "http://biasguard:8004"
            health_check_timeout_secs = 1e-12
            "#,
        );
        assert!(matches!(
            tiny_health_timeout,
            Err(ConfigError::Invalid(msg)) if msg.contains("services.biasguard.health_check_timeout_secs")
        ));

        let mut config = GatewayConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "GUARD_GATEWAY_HEALTH_INTERVAL").then(|| "1e-12".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_durations_never_resolve_to_zero() {
        let mut config = GatewayConfig::default();
        // Mutated after validation
        config.monitor.interval_secs = 1e-12;
        config.defaults.request_timeout_secs = 1e30;

        assert_eq!(config.monitor.interval(), Duration::from_secs(30));
        for service in config.guard_services() {
            assert!(!service.request_timeout.is_zero());
            assert!(!service.health_check_timeout.is_zero());
        }
    }

    #[test]
    fn test_rejects_empty_service_list() {
        let result = GatewayConfig::from_toml_str(
            r#"
            [server]
            port = 9000
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("[[services]]")));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        let env: HashMap<&str, &str> = [
            ("GUARD_GATEWAY_PORT", "9090"),
            ("GUARD_GATEWAY_HEALTH_INTERVAL", "2.5"),
            ("GUARD_GATEWAY_MAX_CONCURRENT_CHECKS", "3"),
            ("TRUSTGUARD_URL", "http://trust.internal:9000"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.address(), "0.0.0.0:9090");
        assert_eq!(config.monitor.interval(), Duration::from_millis(2500));
        assert_eq!(config.monitor.max_concurrent_checks, 3);
        let trust = config
            .guard_services()
            .into_iter()
            .find(|s| s.name == "trustguard")
            .unwrap();
        assert_eq!(trust.base_url, "http://trust.internal:9000");
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "GUARD_GATEWAY_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
