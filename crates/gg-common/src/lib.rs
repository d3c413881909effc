use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::time::Duration;
use utoipa::ToSchema;

/// Maximum length of error strings stored in health records and responses
pub const MAX_ERROR_LEN: usize = 200;

pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";
pub const DEFAULT_PROCESS_ENDPOINT: &str = "/process";
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Service Configuration
// ============================================================================

/// Static configuration of one guard backend.
///
/// Built once at startup and owned by the service registry afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GuardServiceConfig {
    /// Unique registry key, e.g. `tokenguard`
    pub name: String,
    /// Base URL without trailing slash
    pub base_url: String,
    /// Health path relative to the base URL
    pub health_endpoint: String,
    /// Processing path relative to the base URL
    pub process_endpoint: String,
    /// Per-check timeout in seconds
    #[serde(with = "duration_secs")]
    #[schema(value_type = f64)]
    pub health_check_timeout: Duration,
    /// Default dispatch timeout in seconds
    #[serde(with = "duration_secs")]
    #[schema(value_type = f64)]
    pub request_timeout: Duration,
}

impl GuardServiceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: normalize_base_url(&base_url.into()),
            health_endpoint: DEFAULT_HEALTH_ENDPOINT.to_string(),
            process_endpoint: DEFAULT_PROCESS_ENDPOINT.to_string(),
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_health_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_endpoint = normalize_path(&endpoint.into());
        self
    }

    pub fn with_process_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.process_endpoint = normalize_path(&endpoint.into());
        self
    }

    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full URL of the health endpoint
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_endpoint)
    }

    /// Full URL of the processing endpoint
    pub fn process_url(&self) -> String {
        format!("{}{}", self.base_url, self.process_endpoint)
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

// ============================================================================
// Health Types
// ============================================================================

/// Flat health classification of a guard service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServiceStatus {
    /// Classify an HTTP status code returned by a health endpoint.
    /// 200 is healthy, anything else below 500 is degraded, 5xx is unhealthy.
    pub fn from_http_status(code: u16) -> Self {
        match code {
            200 => ServiceStatus::Healthy,
            c if c < 500 => ServiceStatus::Degraded,
            _ => ServiceStatus::Unhealthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unhealthy => "unhealthy",
        }
    }

    /// Gauge value exported for this status
    pub fn gauge_value(&self) -> f64 {
        match self {
            ServiceStatus::Healthy => 2.0,
            ServiceStatus::Degraded => 1.0,
            ServiceStatus::Unhealthy => 0.0,
        }
    }
}

/// How a single health check ended, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Healthy,
    Degraded,
    Timeout,
    Error,
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Healthy => "healthy",
            CheckOutcome::Degraded => "degraded",
            CheckOutcome::Timeout => "timeout",
            CheckOutcome::Error => "error",
        }
    }

    pub fn status(&self) -> ServiceStatus {
        match self {
            CheckOutcome::Healthy => ServiceStatus::Healthy,
            CheckOutcome::Degraded => ServiceStatus::Degraded,
            CheckOutcome::Timeout | CheckOutcome::Error => ServiceStatus::Unhealthy,
        }
    }
}

/// Result of the most recent completed health check of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: ServiceStatus,
    pub last_check: DateTime<Utc>,
    /// Wall-clock duration of the check in seconds
    pub response_time: Option<f64>,
    /// Truncated to `MAX_ERROR_LEN` characters
    pub error_message: Option<String>,
}

impl ServiceHealth {
    pub fn new(
        service_name: impl Into<String>,
        status: ServiceStatus,
        response_time: Option<Duration>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            status,
            last_check: Utc::now(),
            response_time: response_time.map(|d| d.as_secs_f64()),
            error_message: error_message.map(|m| truncate(&m, MAX_ERROR_LEN)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Unified processing request routed to one guard service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessRequest {
    pub service_type: String,
    /// Forwarded to the backend as-is
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Override of the service's request timeout, in seconds
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,
}

fn default_fallback_enabled() -> bool {
    true
}

impl ProcessRequest {
    pub fn new(service_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            service_type: service_type.into(),
            payload,
            user_id: None,
            session_id: None,
            request_id: None,
            priority: 0,
            timeout: None,
            fallback_enabled: true,
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The timeout override as a `Duration`, ignoring non-positive or non-finite values
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Outcome of one dispatch. Built once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessResponse {
    pub success: bool,
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub guard_response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResponse {
    pub fn success(
        service_type: impl Into<String>,
        request_id: Option<String>,
        processing_time: Duration,
        guard_response: serde_json::Value,
    ) -> Self {
        Self {
            success: true,
            service_type: service_type.into(),
            request_id,
            processing_time_ms: duration_ms(processing_time),
            guard_response: Some(guard_response),
            error: None,
        }
    }

    pub fn failure(
        service_type: impl Into<String>,
        request_id: Option<String>,
        processing_time: Duration,
        error: impl AsRef<str>,
    ) -> Self {
        Self {
            success: false,
            service_type: service_type.into(),
            request_id,
            processing_time_ms: duration_ms(processing_time),
            guard_response: None,
            error: Some(truncate(error.as_ref(), MAX_ERROR_LEN)),
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

// ============================================================================
// Helpers
// ============================================================================

/// Truncate to at most `max_chars` characters, respecting char boundaries
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Serde helpers for durations expressed as (fractional) seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
