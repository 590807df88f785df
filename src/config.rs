//! Configuration types for the bean manager.

use crate::types::CacheMode;
use std::time::Duration;

/// Expiration settings, resolved once by the caller and passed in.
///
/// A zero duration disables the corresponding scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationConfig {
    /// How long a released bean may live before it is removed.
    pub timeout: Duration,

    /// How long a released bean may sit idle before its group is passivated.
    pub idle_timeout: Duration,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
        }
    }
}

impl ExpirationConfig {
    /// Create a config with both timeouts.
    pub fn new(timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            timeout,
            idle_timeout,
        }
    }

    /// Whether expiration is enabled.
    pub fn expiration_enabled(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Whether idle eviction is enabled.
    pub fn eviction_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }
}

/// Backing cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache name, part of the dispatcher channel name.
    pub name: String,

    /// Clustering mode.
    pub mode: CacheMode,

    /// Number of owners per key in distributed mode.
    pub num_owners: usize,

    /// Virtual nodes per member on the hash ring.
    pub vnodes_per_node: usize,

    /// Maximum number of entries held in memory.
    pub max_active: u64,

    /// Whether evicted groups are written to the passivation store.
    pub persistent: bool,

    /// How long `stop()` waits for in-flight rehash work.
    pub stop_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "beans".to_string(),
            mode: CacheMode::Distributed,
            num_owners: 2,
            vnodes_per_node: crate::partitioning::DEFAULT_VNODES_PER_NODE,
            max_active: 10_000,
            persistent: true,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with the given cache name and mode.
    pub fn new(name: impl Into<String>, mode: CacheMode) -> Self {
        Self {
            name: name.into(),
            mode,
            ..Default::default()
        }
    }

    /// Set the number of owners.
    pub fn with_num_owners(mut self, num_owners: usize) -> Self {
        self.num_owners = num_owners;
        self
    }

    /// Set the vnode count.
    pub fn with_vnodes_per_node(mut self, vnodes: usize) -> Self {
        self.vnodes_per_node = vnodes;
        self
    }

    /// Set the in-memory capacity.
    pub fn with_max_active(mut self, max_active: u64) -> Self {
        self.max_active = max_active;
        self
    }

    /// Enable or disable the passivation store.
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set the stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Bean manager configuration.
#[derive(Debug, Clone)]
pub struct BeanManagerConfig {
    /// Bean type name. Only entries carrying this name are scheduled by
    /// the manager, and the name is part of the dispatcher channel.
    pub bean_name: String,

    /// Expiration settings.
    pub expiration: ExpirationConfig,

    /// Attempts made by the identifier factory to find a locally owned id.
    pub affinity_attempts: usize,
}

impl Default for BeanManagerConfig {
    fn default() -> Self {
        Self {
            bean_name: "bean".to_string(),
            expiration: ExpirationConfig::default(),
            affinity_attempts: 64,
        }
    }
}

impl BeanManagerConfig {
    /// Create a configuration for the named bean type.
    pub fn new(bean_name: impl Into<String>) -> Self {
        Self {
            bean_name: bean_name.into(),
            ..Default::default()
        }
    }

    /// Set the expiration timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.expiration.timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.expiration.idle_timeout = idle_timeout;
        self
    }

    /// Set the expiration config.
    pub fn with_expiration(mut self, expiration: ExpirationConfig) -> Self {
        self.expiration = expiration;
        self
    }

    /// Set the identifier affinity attempts.
    pub fn with_affinity_attempts(mut self, attempts: usize) -> Self {
        self.affinity_attempts = attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BeanManagerConfig::default();
        assert!(!config.expiration.expiration_enabled());
        assert!(!config.expiration.eviction_enabled());

        let cache = CacheConfig::default();
        assert_eq!(cache.mode, CacheMode::Distributed);
        assert_eq!(cache.num_owners, 2);
        assert!(cache.persistent);
    }

    #[test]
    fn test_config_builder() {
        let config = BeanManagerConfig::new("Cart")
            .with_timeout(Duration::from_secs(600))
            .with_idle_timeout(Duration::from_secs(60));

        assert_eq!(config.bean_name, "Cart");
        assert!(config.expiration.expiration_enabled());
        assert_eq!(config.expiration.idle_timeout, Duration::from_secs(60));

        let cache = CacheConfig::new("sfsb", CacheMode::Local)
            .with_max_active(5)
            .with_persistent(false);
        assert_eq!(cache.name, "sfsb");
        assert_eq!(cache.max_active, 5);
        assert!(!cache.persistent);
    }
}
