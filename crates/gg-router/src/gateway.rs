//! GuardGateway - single entry point over registry, monitor and dispatcher
//!
//! Owns the lifecycle of the health monitor and the outbound transport, and
//! aggregates request statistics across all dispatches.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use gg_common::{GuardServiceConfig, ProcessRequest, ProcessResponse, ServiceHealth};
use gg_config::GatewayConfig;
use crate::dispatcher::RequestDispatcher;
use crate::error::RouterError;
use crate::health::{HealthMonitor, HealthMonitorConfig};
use crate::registry::ServiceRegistry;
use crate::transport::{GuardTransport, HttpTransport, HttpTransportConfig};
use crate::Result;

/// Aggregate request statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GatewayStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Requests per registered service type
    pub requests_by_service: BTreeMap<String, u64>,
    pub average_processing_time_ms: f64,
    pub uptime_seconds: u64,
    pub registered_services: usize,
    pub healthy_services: usize,
    pub health_sweeps_completed: u64,
}

#[derive(Default)]
struct StatsCollector {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_processing_us: AtomicU64,
    by_service: DashMap<String, u64>,
}

impl StatsCollector {
    fn record(&self, response: &ProcessResponse, known_service: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if response.success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_us
            .fetch_add((response.processing_time_ms * 1000.0) as u64, Ordering::Relaxed);
        if known_service {
            *self.by_service.entry(response.service_type.clone()).or_insert(0) += 1;
        }
    }

    fn average_ms(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_processing_us.load(Ordering::Relaxed) as f64 / 1000.0 / total as f64
    }
}

pub struct GuardGateway {
    registry: Arc<ServiceRegistry>,
    monitor: Arc<HealthMonitor>,
    dispatcher: RequestDispatcher,
    transport: Arc<dyn GuardTransport>,
    stats: StatsCollector,
    started_at: Instant,
    ready: AtomicBool,
    shutting_down: AtomicBool,
}

impl GuardGateway {
    /// Assemble the gateway without starting anything
    pub fn new(
        services: Vec<GuardServiceConfig>,
        monitor_config: HealthMonitorConfig,
        transport: Arc<dyn GuardTransport>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::from_configs(services));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            transport.clone(),
            monitor_config,
        ));
        let dispatcher = RequestDispatcher::new(registry.clone(), monitor.clone(), transport.clone());

        Self {
            registry,
            monitor,
            dispatcher,
            transport,
            stats: StatsCollector::default(),
            started_at: Instant::now(),
            ready: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Build from configuration with the HTTP transport, start monitoring and prime health
    pub async fn initialize(config: &GatewayConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default())?);
        Ok(Self::initialize_with_transport(
            config.guard_services(),
            HealthMonitorConfig::from(&config.monitor),
            transport,
        )
        .await)
    }

    /// Same as [`GuardGateway::initialize`] with a caller-supplied transport
    pub async fn initialize_with_transport(
        services: Vec<GuardServiceConfig>,
        monitor_config: HealthMonitorConfig,
        transport: Arc<dyn GuardTransport>,
    ) -> Self {
        let gateway = Self::new(services, monitor_config, transport);
        gateway.start().await;
        gateway
    }

    /// Start the health monitor and run one priming sweep before accepting traffic
    pub async fn start(&self) {
        self.monitor.start();

        let started = Instant::now();
        let results = self.monitor.check_all().await;
        let healthy = results.values().filter(|h| h.is_healthy()).count();
        self.ready.store(true, Ordering::SeqCst);

        info!(
            services = results.len(),
            healthy = healthy,
            duration_ms = started.elapsed().as_millis() as u64,
            "Priming health sweep complete, gateway ready"
        );
    }

    /// Route one request to its guard service
    pub async fn process(&self, request: ProcessRequest) -> ProcessResponse {
        let known_service = self.registry.contains(&request.service_type);

        let response = if self.shutting_down.load(Ordering::SeqCst) {
            ProcessResponse::failure(
                request.service_type,
                request.request_id,
                Duration::ZERO,
                RouterError::ShuttingDown.to_string(),
            )
        } else {
            self.dispatcher.dispatch(request).await
        };

        self.stats.record(&response, known_service);
        response
    }

    /// Stop monitoring and release outbound connections. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Gateway shutting down");
        self.ready.store(false, Ordering::SeqCst);

        self.monitor.stop().await;
        self.transport.close().await;
        info!("Gateway shutdown complete");
    }

    /// Full health table
    pub fn health_snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.monitor.snapshot()
    }

    pub fn status_of(&self, name: &str) -> Option<ServiceHealth> {
        self.monitor.status_of(name)
    }

    /// Every registered service
    pub fn services(&self) -> Vec<GuardServiceConfig> {
        self.registry.all()
    }

    /// True once the priming sweep finished and until shutdown begins
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn stats(&self) -> GatewayStats {
        let snapshot = self.monitor.snapshot();
        GatewayStats {
            total_requests: self.stats.total.load(Ordering::Relaxed),
            successful_requests: self.stats.successful.load(Ordering::Relaxed),
            failed_requests: self.stats.failed.load(Ordering::Relaxed),
            requests_by_service: self
                .stats
                .by_service
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            average_processing_time_ms: self.stats.average_ms(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            registered_services: self.registry.len(),
            healthy_services: snapshot.values().filter(|h| h.is_healthy()).count(),
            health_sweeps_completed: self.monitor.sweeps_completed(),
        }
    }
}
