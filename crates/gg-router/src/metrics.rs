//! Gateway metrics recorded through the `metrics` facade.
//!
//! Nothing is exported from here; the binary installs a Prometheus recorder
//! and the API renders it.

use std::time::Duration;
use metrics::{counter, gauge, histogram};

use gg_common::{CheckOutcome, ServiceStatus};

pub const HEALTH_CHECKS_TOTAL: &str = "guard_health_checks_total";
pub const HEALTH_CHECK_DURATION: &str = "guard_health_check_duration_seconds";
pub const SERVICE_STATUS: &str = "guard_service_status";
pub const DISPATCH_TOTAL: &str = "guard_dispatch_total";
pub const DISPATCH_DURATION: &str = "guard_dispatch_duration_seconds";

/// Record one completed health check
pub fn record_health_check(service: &str, outcome: CheckOutcome, duration: Duration) {
    counter!(
        HEALTH_CHECKS_TOTAL,
        "service" => service.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(HEALTH_CHECK_DURATION, "service" => service.to_string())
        .record(duration.as_secs_f64());
    record_status(service, outcome.status());
}

pub fn record_status(service: &str, status: ServiceStatus) {
    gauge!(SERVICE_STATUS, "service" => service.to_string()).set(status.gauge_value());
}

/// Record one dispatch. `outcome` is `success` or a `RouterError::kind()` label.
pub fn record_dispatch(service: &str, outcome: &'static str, duration: Duration) {
    counter!(
        DISPATCH_TOTAL,
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(DISPATCH_DURATION, "service" => service.to_string())
        .record(duration.as_secs_f64());
}
