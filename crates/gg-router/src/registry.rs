//! ServiceRegistry - static configuration of every known guard service
//!
//! Mutable only while the gateway is being assembled. Once wrapped in an `Arc`
//! and handed to the monitor and dispatcher it is read-only and lock-free.

use indexmap::IndexMap;
use tracing::debug;

use gg_common::GuardServiceConfig;
use crate::error::RouterError;
use crate::Result;

/// Registered guard services keyed by name, in registration order
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, GuardServiceConfig>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of configs. Later duplicates win.
    pub fn from_configs(configs: impl IntoIterator<Item = GuardServiceConfig>) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config);
        }
        registry
    }

    /// Register a service. Re-registering a name replaces the earlier config.
    pub fn register(&mut self, config: GuardServiceConfig) {
        if let Some(previous) = self.services.get(&config.name) {
            debug!(
                service = %config.name,
                old_url = %previous.base_url,
                new_url = %config.base_url,
                "Replacing registered service"
            );
        }
        self.services.insert(config.name.clone(), config);
    }

    /// Look up one service by name
    pub fn get(&self, name: &str) -> Result<&GuardServiceConfig> {
        self.services.get(name).ok_or_else(|| RouterError::UnknownService {
            service_type: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// All registered services
    pub fn all(&self) -> Vec<GuardServiceConfig> {
        self.services.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GuardServiceConfig> {
        self.services.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
