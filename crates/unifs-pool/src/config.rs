use std::time::Duration;

/// Sizing and timing limits for a [`Pool`][crate::Pool].
///
/// `initial_size <= max_size` holds for every value this type can take;
/// the builder clamps whichever side was set last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    max_wait_time: Option<Duration>,
    max_idle_time: Option<Duration>,
    initial_size: usize,
    max_size: usize,
}

impl PoolConfig {
    /// Returns a builder initialized with the default configuration.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder {
            config: PoolConfig::default(),
        }
    }

    /// How long [`Pool::acquire`][crate::Pool::acquire] waits for an object
    /// when the pool is saturated. `None` waits indefinitely.
    pub fn max_wait_time(&self) -> Option<Duration> {
        self.max_wait_time
    }

    /// How long an object may sit idle before it is discarded on the next
    /// acquisition. `None` keeps idle objects forever.
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time
    }

    /// The number of objects created eagerly when the pool is built.
    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    /// The maximum number of objects the pool will own at once.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_wait_time: None,
            max_idle_time: None,
            initial_size: 5,
            max_size: 10,
        }
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn max_wait_time(mut self, value: Option<Duration>) -> Self {
        self.config.max_wait_time = value;
        self
    }

    pub fn max_idle_time(mut self, value: Option<Duration>) -> Self {
        self.config.max_idle_time = value;
        self
    }

    /// Sets the initial size, raising the maximum size to match if needed.
    pub fn initial_size(mut self, value: usize) -> Self {
        self.config.initial_size = value;
        self.config.max_size = self.config.max_size.max(value).max(1);
        self
    }

    /// Sets the maximum size, lowering the initial size to match if needed.
    /// A maximum of zero is clamped to one.
    pub fn max_size(mut self, value: usize) -> Self {
        self.config.max_size = value.max(1);
        self.config.initial_size = self.config.initial_size.min(self.config.max_size);
        self
    }

    pub fn build(self) -> PoolConfig {
        self.config
    }
}
