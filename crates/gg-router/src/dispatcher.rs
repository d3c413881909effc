//! RequestDispatcher - turns one `ProcessRequest` into one `ProcessResponse`
//!
//! Health is advisory: an unhealthy service is refused only when the caller
//! disabled fallback. There is exactly one backend per service type, so a
//! failed call is reported, never retried elsewhere.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use gg_common::{ProcessRequest, ProcessResponse, ServiceStatus};
use crate::error::RouterError;
use crate::health::HealthMonitor;
use crate::metrics;
use crate::registry::ServiceRegistry;
use crate::transport::{GuardTransport, TransportError};
use crate::Result;

/// Label used for metrics when the requested service type is not registered
const UNKNOWN_SERVICE_LABEL: &str = "unknown";

pub struct RequestDispatcher {
    registry: Arc<ServiceRegistry>,
    monitor: Arc<HealthMonitor>,
    transport: Arc<dyn GuardTransport>,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        monitor: Arc<HealthMonitor>,
        transport: Arc<dyn GuardTransport>,
    ) -> Self {
        Self {
            registry,
            monitor,
            transport,
        }
    }

    /// Dispatch a request. Every failure is folded into the response.
    pub async fn dispatch(&self, request: ProcessRequest) -> ProcessResponse {
        let started = Instant::now();
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let result = self.route(&request, &request_id).await;
        let elapsed = started.elapsed();

        let metric_service = if self.registry.contains(&request.service_type) {
            request.service_type.as_str()
        } else {
            UNKNOWN_SERVICE_LABEL
        };

        match result {
            Ok(guard_response) => {
                metrics::record_dispatch(metric_service, "success", elapsed);
                debug!(
                    service = %request.service_type,
                    request_id = %request_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Request dispatched"
                );
                ProcessResponse::success(
                    request.service_type,
                    Some(request_id),
                    elapsed,
                    guard_response,
                )
            }
            Err(e) => {
                metrics::record_dispatch(metric_service, e.kind(), elapsed);
                warn!(
                    service = %request.service_type,
                    request_id = %request_id,
                    kind = e.kind(),
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Dispatch failed"
                );
                ProcessResponse::failure(request.service_type, Some(request_id), elapsed, e.to_string())
            }
        }
    }

    async fn route(&self, request: &ProcessRequest, request_id: &str) -> Result<serde_json::Value> {
        let config = self.registry.get(&request.service_type)?;

        if let Some(health) = self.monitor.status_of(&config.name) {
            if health.status == ServiceStatus::Unhealthy {
                if !request.fallback_enabled {
                    return Err(RouterError::Unavailable {
                        service_type: config.name.clone(),
                    });
                }
                warn!(
                    service = %config.name,
                    request_id = %request_id,
                    "Service marked unhealthy, attempting call with fallback enabled"
                );
            }
        }

        let timeout = request.timeout_override().unwrap_or(config.request_timeout);
        let url = config.process_url();

        let call = self.transport.post_json(&url, &request.payload, timeout);
        let response = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                return Err(RouterError::Timeout { after: timeout })
            }
            Ok(Err(TransportError::Connection(msg))) => return Err(RouterError::connection(msg)),
        };

        if !response.is_success() {
            return Err(RouterError::protocol(response.status, &response.body_text()));
        }

        Ok(response.json_body())
    }
}
