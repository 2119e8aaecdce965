//! Engine configuration.
//!
//! Braid is an embeddable library, so configuration is code-level: a
//! plain struct with constructors for the common shapes. There are no
//! config files.

use serde::{Deserialize, Serialize};

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Human-readable engine name, used in log output.
    pub name: String,
    /// Maximum scheduling steps retained by the engine log before the
    /// oldest is evicted. Clamped to at least 1.
    pub log_capacity: usize,
}

impl EngineConfig {
    /// Default log capacity.
    pub const DEFAULT_LOG_CAPACITY: usize = 1000;

    /// Creates a config with the given name and default capacity.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log_capacity: Self::DEFAULT_LOG_CAPACITY,
        }
    }

    /// Sets the retained log capacity.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::named("braid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_named_braid() {
        let config = EngineConfig::default();
        assert_eq!(config.name, "braid");
        assert_eq!(config.log_capacity, EngineConfig::DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn capacity_is_clamped() {
        let config = EngineConfig::named("t").with_log_capacity(0);
        assert_eq!(config.log_capacity, 1);
    }
}
