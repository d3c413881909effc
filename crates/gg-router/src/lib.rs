//! Guard Gateway Router
//!
//! This crate provides the core routing functionality in front of the guard services:
//! - ServiceRegistry: Static configuration of every guard backend
//! - HealthMonitor: Periodic health sweeps with bounded concurrency and cancellation
//! - RequestDispatcher: Health-aware dispatch with timeouts and fallback policy
//! - GuardGateway: Lifecycle owner and single call surface over the three above
//! - GuardTransport: Outbound HTTP seam with a reqwest implementation

pub mod error;
pub mod registry;
pub mod transport;
pub mod health;
pub mod dispatcher;
pub mod gateway;
pub mod metrics;

#[cfg(test)]
mod testing;

pub use error::RouterError;
pub use registry::ServiceRegistry;
pub use transport::{GuardTransport, HttpTransport, HttpTransportConfig, TransportError, TransportResponse};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use dispatcher::RequestDispatcher;
pub use gateway::{GuardGateway, GatewayStats};

pub type Result<T> = std::result::Result<T, RouterError>;
