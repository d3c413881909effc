//! HealthMonitor - periodic, concurrency-bounded health checks of guard services
//!
//! - One background task runs a sweep every `interval`
//! - Each sweep fans out one check per registered service, capped by a semaphore
//! - Every check is bounded by the service's own `health_check_timeout`
//! - A failing or panicking check only ever updates its own table entry
//! - `stop()` cancels the loop, stops scheduling new checks and waits for the
//!   in-flight ones within a grace period

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gg_common::{CheckOutcome, GuardServiceConfig, ServiceHealth, ServiceStatus};
use gg_config::MonitorSettings;
use crate::metrics;
use crate::registry::ServiceRegistry;
use crate::transport::{GuardTransport, TransportError};

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Delay between the end of one sweep and the start of the next
    pub interval: Duration,
    /// Maximum number of health checks in flight at once
    pub max_concurrent_checks: usize,
    /// How long `stop()` waits for the loop before aborting it
    pub stop_grace: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_concurrent_checks: 10,
            stop_grace: Duration::from_secs(10),
        }
    }
}

impl From<&MonitorSettings> for HealthMonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            interval: settings.interval(),
            max_concurrent_checks: settings.max_concurrent_checks.max(1),
            stop_grace: settings.stop_grace(),
        }
    }
}

/// Latest health record per service.
///
/// Each record is replaced whole under its shard lock, so a reader sees either
/// the previous or the next complete record.
#[derive(Clone, Default)]
struct HealthTable {
    entries: Arc<DashMap<String, ServiceHealth>>,
}

impl HealthTable {
    /// Replace the record unless the stored one comes from a later check
    fn record(&self, health: ServiceHealth) {
        match self.entries.entry(health.service_name.clone()) {
            Entry::Occupied(mut current) => {
                if health.last_check >= current.get().last_check {
                    current.insert(health);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(health);
            }
        }
    }

    fn get(&self, name: &str) -> Option<ServiceHealth> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

struct MonitorTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Monitors the health of every service in the registry
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn GuardTransport>,
    config: HealthMonitorConfig,
    table: HealthTable,
    /// Shared by every sweep, including ad-hoc `check_all` calls
    semaphore: Arc<Semaphore>,
    task: Mutex<Option<MonitorTask>>,
    sweeps_completed: AtomicU64,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        transport: Arc<dyn GuardTransport>,
        config: HealthMonitorConfig,
    ) -> Self {
        let permits = config.max_concurrent_checks.max(1);
        Self {
            registry,
            transport,
            config,
            table: HealthTable::default(),
            semaphore: Arc::new(Semaphore::new(permits)),
            task: Mutex::new(None),
            sweeps_completed: AtomicU64::new(0),
        }
    }

    /// Start periodic monitoring. Returns false if the loop was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Health monitor already running");
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::run_loop(Arc::downgrade(self), token.clone()));
        *task = Some(MonitorTask { token, handle });

        info!(
            services = self.registry.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            max_concurrent_checks = self.config.max_concurrent_checks,
            "Health monitor started"
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Stop monitoring and wait for the in-flight sweep.
    ///
    /// Returns false if the loop had to be aborted after the grace period.
    pub async fn stop(&self) -> bool {
        let Some(mut task) = self.task.lock().take() else {
            return true;
        };

        info!("Health monitor stopping");
        task.token.cancel();

        match tokio::time::timeout(self.config.stop_grace, &mut task.handle).await {
            Ok(Ok(())) => {
                info!("Health monitor stopped");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Health monitor task failed");
                true
            }
            Err(_) => {
                warn!(
                    grace_ms = self.config.stop_grace.as_millis() as u64,
                    "Health monitor did not stop within grace period, aborting"
                );
                task.handle.abort();
                false
            }
        }
    }

    async fn run_loop(monitor: Weak<Self>, token: CancellationToken) {
        loop {
            let interval = match monitor.upgrade() {
                Some(m) => m.config.interval,
                None => break,
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let Some(monitor) = monitor.upgrade() else {
                break;
            };
            monitor.sweep(&token).await;
        }
        debug!("Health monitor loop exited");
    }

    /// Run one full sweep now
    pub async fn check_all(&self) -> HashMap<String, ServiceHealth> {
        self.sweep(&CancellationToken::new()).await
    }

    async fn sweep(&self, token: &CancellationToken) -> HashMap<String, ServiceHealth> {
        let started = Instant::now();
        let mut checks = JoinSet::new();
        let mut skipped = 0usize;

        for config in self.registry.iter() {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    skipped += 1;
                    continue;
                }
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => {
                        error!("Health check semaphore closed");
                        break;
                    }
                },
            };

            let config = config.clone();
            let transport = self.transport.clone();
            let table = self.table.clone();
            checks.spawn(async move {
                let health = run_check(transport.as_ref(), &config).await;
                table.record(health.clone());
                drop(permit);
                health
            });
        }

        let mut results = HashMap::with_capacity(checks.len());
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(health) => {
                    results.insert(health.service_name.clone(), health);
                }
                Err(e) => error!(error = %e, "Health check task failed"),
            }
        }

        if skipped > 0 {
            info!(
                completed = results.len(),
                skipped = skipped,
                "Health sweep cancelled"
            );
        } else {
            self.sweeps_completed.fetch_add(1, Ordering::SeqCst);
            let healthy = results.values().filter(|h| h.is_healthy()).count();
            debug!(
                services = results.len(),
                healthy = healthy,
                duration_ms = started.elapsed().as_millis() as u64,
                "Health sweep complete"
            );
        }

        results
    }

    /// Check one service now and record the result
    pub async fn check_one(&self, config: &GuardServiceConfig) -> ServiceHealth {
        let health = run_check(self.transport.as_ref(), config).await;
        self.table.record(health.clone());
        health
    }

    /// Latest completed check for `name`
    pub fn status_of(&self, name: &str) -> Option<ServiceHealth> {
        self.table.get(name)
    }

    /// Copy of the whole health table
    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.table.snapshot()
    }

    /// Number of sweeps that ran to completion
    pub fn sweeps_completed(&self) -> u64 {
        self.sweeps_completed.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }
}

/// Run one check, containing any panic raised by the transport
async fn run_check(transport: &dyn GuardTransport, config: &GuardServiceConfig) -> ServiceHealth {
    let started = Instant::now();
    match AssertUnwindSafe(perform_check(transport, config)).catch_unwind().await {
        Ok(health) => health,
        Err(_) => {
            let elapsed = started.elapsed();
            error!(service = %config.name, "Health check panicked");
            metrics::record_health_check(&config.name, CheckOutcome::Error, elapsed);
            ServiceHealth::new(
                config.name.as_str(),
                ServiceStatus::Unhealthy,
                Some(elapsed),
                Some("health check panicked".to_string()),
            )
        }
    }
}

async fn perform_check(transport: &dyn GuardTransport, config: &GuardServiceConfig) -> ServiceHealth {
    let url = config.health_url();
    let timeout = config.health_check_timeout;
    let started = Instant::now();

    let result = tokio::time::timeout(timeout, transport.get(&url, timeout)).await;
    let elapsed = started.elapsed();

    let (outcome, error_message) = match result {
        Ok(Ok(response)) => match ServiceStatus::from_http_status(response.status) {
            ServiceStatus::Healthy => (CheckOutcome::Healthy, None),
            ServiceStatus::Degraded => (
                CheckOutcome::Degraded,
                Some(format!("HTTP {}", response.status)),
            ),
            ServiceStatus::Unhealthy => (
                CheckOutcome::Error,
                Some(format!("HTTP {}: {}", response.status, response.body_text())),
            ),
        },
        Ok(Err(TransportError::Timeout)) | Err(_) => (CheckOutcome::Timeout, Some("timeout".to_string())),
        Ok(Err(TransportError::Connection(msg))) => (CheckOutcome::Error, Some(msg)),
    };

    metrics::record_health_check(&config.name, outcome, elapsed);

    match outcome {
        CheckOutcome::Healthy => debug!(
            service = %config.name,
            duration_ms = elapsed.as_millis() as u64,
            "Health check passed"
        ),
        _ => warn!(
            service = %config.name,
            url = %url,
            outcome = outcome.as_str(),
            error = ?error_message,
            duration_ms = elapsed.as_millis() as u64,
            "Health check failed"
        ),
    }

    ServiceHealth::new(config.name.as_str(), outcome.status(), Some(elapsed), error_message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, MockTransport};

    fn service(name: &str) -> GuardServiceConfig {
        GuardServiceConfig::new(name, format!("http://{}", name))
            .with_health_check_timeout(Duration::from_millis(200))
    }

    fn health_url(name: &str) -> String {
        format!("http://{}/health", name)
    }

    fn monitor_with(
        names: &[&str],
        transport: Arc<MockTransport>,
        config: HealthMonitorConfig,
    ) -> Arc<HealthMonitor> {
        let registry = Arc::new(ServiceRegistry::from_configs(names.iter().map(|n| service(n))));
        Arc::new(HealthMonitor::new(registry, transport, config))
    }

    #[test]
    fn test_default_config() {
        let config = HealthMonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_checks, 10);
    }

    #[tokio::test]
    async fn test_check_all_populates_every_service() {
        let transport = Arc::new(MockTransport::healthy());
        let names = ["tokenguard", "trustguard", "contextguard", "biasguard", "healthguard"];
        let monitor = monitor_with(&names, transport.clone(), HealthMonitorConfig::default());

        assert!(monitor.status_of("tokenguard").is_none());

        let results = monitor.check_all().await;
        assert_eq!(results.len(), names.len());
        for name in names {
            let health = monitor.status_of(name).expect("missing health entry");
            assert_eq!(health.status, ServiceStatus::Healthy);
            assert!(health.response_time.is_some());
        }
        assert_eq!(monitor.snapshot().len(), names.len());
        assert_eq!(monitor.sweeps_completed(), 1);
    }

    #[tokio::test]
    async fn test_classification() {
        let transport = Arc::new(
            MockTransport::healthy()
                .with(health_url("degraded"), Behavior::Respond(404, String::new()))
                .with(health_url("failing"), Behavior::Respond(500, "boom".to_string()))
                .with(health_url("refused"), Behavior::Refuse),
        );
        let monitor = monitor_with(
            &["ok", "degraded", "failing", "refused"],
            transport,
            HealthMonitorConfig::default(),
        );

        monitor.check_all().await;

        assert_eq!(monitor.status_of("ok").unwrap().status, ServiceStatus::Healthy);
        assert_eq!(monitor.status_of("degraded").unwrap().status, ServiceStatus::Degraded);

        let failing = monitor.status_of("failing").unwrap();
        assert_eq!(failing.status, ServiceStatus::Unhealthy);
        assert_eq!(failing.error_message.as_deref(), Some("HTTP 500: boom"));

        let refused = monitor.status_of("refused").unwrap();
        assert_eq!(refused.status, ServiceStatus::Unhealthy);
        assert_eq!(refused.error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_hung_backend_times_out_without_blocking_sweep() {
        let transport = Arc::new(MockTransport::healthy().with(health_url("hung"), Behavior::Hang));
        let monitor = monitor_with(&["hung", "ok"], transport, HealthMonitorConfig::default());

        let started = Instant::now();
        monitor.check_all().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(1), "sweep took {:?}", elapsed);

        let hung = monitor.status_of("hung").unwrap();
        assert_eq!(hung.status, ServiceStatus::Unhealthy);
        assert_eq!(hung.error_message.as_deref(), Some("timeout"));
        assert_eq!(monitor.status_of("ok").unwrap().status, ServiceStatus::Healthy);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let transport = Arc::new(MockTransport::new(Behavior::Slow(Duration::from_millis(50))));
        let names: Vec<String> = (0..10).map(|i| format!("guard-{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let config = HealthMonitorConfig {
            max_concurrent_checks: 3,
            ..Default::default()
        };
        let monitor = monitor_with(&refs, transport.clone(), config);

        monitor.check_all().await;

        assert_eq!(transport.call_count(), 10);
        assert!(transport.max_in_flight() <= 3, "peak {}", transport.max_in_flight());
        assert!(transport.max_in_flight() > 1);
        assert_eq!(monitor.snapshot().len(), 10);
    }

    #[tokio::test]
    async fn test_panicking_check_is_contained() {
        let transport = Arc::new(MockTransport::healthy().with(health_url("explodes"), Behavior::Panic));
        let monitor = monitor_with(&["explodes", "ok"], transport, HealthMonitorConfig::default());

        let results = monitor.check_all().await;

        assert_eq!(results.len(), 2);
        let exploded = monitor.status_of("explodes").unwrap();
        assert_eq!(exploded.status, ServiceStatus::Unhealthy);
        assert_eq!(exploded.error_message.as_deref(), Some("health check panicked"));
        assert_eq!(monitor.status_of("ok").unwrap().status, ServiceStatus::Healthy);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_restartable() {
        let transport = Arc::new(MockTransport::healthy());
        let config = HealthMonitorConfig {
            interval: Duration::from_millis(20),
            ..Default::default()
        };
        let monitor = monitor_with(&["tokenguard"], transport, config);

        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());

        assert!(monitor.stop().await);
        assert!(!monitor.is_running());
        // Stopping twice is harmless
        assert!(monitor.stop().await);

        assert!(monitor.start());
        assert!(monitor.stop().await);
    }

    #[tokio::test]
    async fn test_loop_keeps_running_through_failures() {
        let transport = Arc::new(
            MockTransport::healthy()
                .with(health_url("refused"), Behavior::Refuse)
                .with(health_url("explodes"), Behavior::Panic),
        );
        let config = HealthMonitorConfig {
            interval: Duration::from_millis(20),
            ..Default::default()
        };
        let monitor = monitor_with(&["refused", "explodes", "ok"], transport, config);

        monitor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(monitor.is_running());
        assert!(monitor.sweeps_completed() >= 2, "sweeps {}", monitor.sweeps_completed());
        assert!(monitor.stop().await);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_and_skips_unscheduled() {
        let slow = Duration::from_millis(300);
        let transport = Arc::new(MockTransport::healthy().with(health_url("slow"), Behavior::Slow(slow)));
        let config = HealthMonitorConfig {
            interval: Duration::from_millis(20),
            max_concurrent_checks: 1,
            stop_grace: Duration::from_secs(2),
        };
        let registry = Arc::new(ServiceRegistry::from_configs(vec![
            GuardServiceConfig::new("slow", "http://slow").with_health_check_timeout(Duration::from_secs(1)),
            service("second"),
            service("third"),
        ]));
        let monitor = Arc::new(HealthMonitor::new(registry, transport.clone(), config));

        monitor.start();
        // First sweep begins after one interval; the slow check then holds the only permit
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.call_count(), 1);

        let started = Instant::now();
        assert!(monitor.stop().await);
        let stop_took = started.elapsed();
        assert!(stop_took < Duration::from_secs(1), "stop took {:?}", stop_took);

        // The in-flight check finished and was recorded
        assert_eq!(monitor.status_of("slow").unwrap().status, ServiceStatus::Healthy);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.call_count(), 1);
        assert!(monitor.status_of("second").is_none());
        assert!(monitor.status_of("third").is_none());
    }

    #[tokio::test]
    async fn test_stop_aborts_after_grace_period() {
        let transport = Arc::new(MockTransport::healthy().with(health_url("hung"), Behavior::Hang));
        let config = HealthMonitorConfig {
            interval: Duration::from_millis(20),
            max_concurrent_checks: 1,
            stop_grace: Duration::from_millis(100),
        };
        let registry = Arc::new(ServiceRegistry::from_configs(vec![
            GuardServiceConfig::new("hung", "http://hung").with_health_check_timeout(Duration::from_secs(5)),
            service("second"),
        ]));
        let monitor = Arc::new(HealthMonitor::new(registry, transport.clone(), config));

        monitor.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(transport.call_count(), 1);

        let started = Instant::now();
        assert!(!monitor.stop().await);
        let stop_took = started.elapsed();

        assert!(stop_took >= Duration::from_millis(100), "stop took {:?}", stop_took);
        assert!(stop_took < Duration::from_secs(1), "stop took {:?}", stop_took);
        assert!(!monitor.is_running());

        // The aborted check never recorded anything and nothing else was scheduled
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.status_of("hung").is_none());
        assert!(monitor.status_of("second").is_none());
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_table_keeps_most_recent_check() {
        let table = HealthTable::default();
        let older = ServiceHealth::new("tokenguard", ServiceStatus::Unhealthy, None, Some("timeout".to_string()));
        let mut newer = ServiceHealth::new("tokenguard", ServiceStatus::Healthy, None, None);
        newer.last_check = older.last_check + chrono::Duration::milliseconds(10);

        table.record(newer.clone());
        table.record(older);

        assert_eq!(table.get("tokenguard"), Some(newer.clone()));

        let mut latest = ServiceHealth::new("tokenguard", ServiceStatus::Degraded, None, None);
        latest.last_check = newer.last_check + chrono::Duration::milliseconds(10);
        table.record(latest.clone());
        assert_eq!(table.get("tokenguard"), Some(latest));
    }

    #[tokio::test]
    async fn test_check_one_overwrites_previous_record() {
        let transport = Arc::new(MockTransport::healthy());
        let monitor = monitor_with(&["tokenguard"], transport, HealthMonitorConfig::default());
        let config = monitor.registry().get("tokenguard").unwrap().clone();

        let first = monitor.check_one(&config).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = monitor.check_one(&config).await;

        assert!(second.last_check > first.last_check);
        assert_eq!(monitor.status_of("tokenguard").unwrap().last_check, second.last_check);
    }
}
