//! # Pool Configuration
//!
//! Sizing policy and bootstrap options for [`PoolRegistry::init_with`].
//!
//! [`PoolRegistry::init_with`]: super::PoolRegistry::init_with

use std::time::Duration;

use super::PoolError;

/// How the size of each node's region is derived from the topology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoolSizing {
    /// Each node requests `fraction` of its own reported memory.
    ///
    /// The default, with `fraction = 1.0`, pools each node's whole memory.
    PerNode {
        /// Share of the node's memory to pool, in `(0, 1]`
        fraction: f64,
    },

    /// Every node requests `fraction` of node 0's reported memory.
    ///
    /// Assumes a symmetric topology; on asymmetric machines smaller nodes
    /// may fail to satisfy the request.
    Representative {
        /// Share of node 0's memory to pool, in `(0, 1]`
        fraction: f64,
    },

    /// Every node requests exactly this many bytes.
    Fixed(usize),
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self::PerNode { fraction: 1.0 }
    }
}

impl PoolSizing {
    fn validate(&self) -> Result<(), PoolError> {
        match *self {
            Self::PerNode { fraction } | Self::Representative { fraction } => {
                if !(fraction > 0.0 && fraction <= 1.0) {
                    return Err(PoolError::InvalidConfig(format!(
                        "memory fraction must be in (0, 1], got {fraction}"
                    )));
                }
            }
            Self::Fixed(0) => {
                return Err(PoolError::InvalidConfig(
                    "fixed pool size must be > 0".to_string(),
                ));
            }
            Self::Fixed(_) => {}
        }
        Ok(())
    }
}

/// Configuration for pool bootstrap.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How each node's region size is chosen
    pub sizing: PoolSizing,
    /// Abort bootstrap if not every node has reported within this time
    pub bootstrap_timeout: Option<Duration>,
    /// Name prefix for bootstrap worker threads (`{prefix}-{node}`);
    /// non-empty and free of NUL bytes
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            sizing: PoolSizing::default(),
            bootstrap_timeout: None,
            thread_name_prefix: "numadp-boot".to_string(),
        }
    }
}

impl PoolConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if the configuration is invalid.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.sizing.validate()?;
        if self.bootstrap_timeout == Some(Duration::ZERO) {
            return Err(PoolError::InvalidConfig(
                "bootstrap_timeout must be > 0".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(PoolError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(PoolError::InvalidConfig(
                "thread_name_prefix must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for `PoolConfig`.
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    sizing: Option<PoolSizing>,
    bootstrap_timeout: Option<Duration>,
    thread_name_prefix: Option<String>,
}

impl PoolConfigBuilder {
    /// Sets the sizing policy.
    #[must_use]
    pub fn sizing(mut self, sizing: PoolSizing) -> Self {
        self.sizing = Some(sizing);
        self
    }

    /// Pool `fraction` of each node's own memory.
    #[must_use]
    pub fn per_node_fraction(self, fraction: f64) -> Self {
        self.sizing(PoolSizing::PerNode { fraction })
    }

    /// Request the same fixed size on every node.
    #[must_use]
    pub fn fixed_size(self, bytes: usize) -> Self {
        self.sizing(PoolSizing::Fixed(bytes))
    }

    /// Sets the overall bootstrap timeout.
    #[must_use]
    pub fn bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = Some(timeout);
        self
    }

    /// Sets the bootstrap thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<PoolConfig, PoolError> {
        let defaults = PoolConfig::default();
        let config = PoolConfig {
            sizing: self.sizing.unwrap_or(defaults.sizing),
            bootstrap_timeout: self.bootstrap_timeout,
            thread_name_prefix: self
                .thread_name_prefix
                .unwrap_or(defaults.thread_name_prefix),
        };
        config.validate()?;
        Ok(config)
    }
}
