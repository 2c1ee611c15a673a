use serde::Deserialize;

// =======================================================
// POOL CONFIG + DEFAULTS
// =======================================================

/// The `[pool]` section: limits for the upstream connection pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Maximum outstanding upstream connections (idle plus in use).
    pub max_connections: usize,

    /// Idle connections kept warm while capacity allows.
    pub min_idle_connections: usize,

    /// Idle upstreams older than this are closed by the sweeper.
    pub idle_timeout_secs: u64,

    /// Concurrency used when draining the idle set at shutdown.
    pub close_pool_size: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections: 100,
            min_idle_connections: 0,
            idle_timeout_secs: 3600,
            close_pool_size: 16,
        }
    }
}

impl PoolSection {
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn min_idle_connections(&self) -> usize {
        self.min_idle_connections
    }

    pub fn idle_timeout_secs(&self) -> u64 {
        self.idle_timeout_secs
    }

    pub fn close_pool_size(&self) -> usize {
        self.close_pool_size
    }

    pub(crate) fn apply_defaults_from(&mut self, defaults: &PoolSection) {
        if self.idle_timeout_secs == 0 {
            self.idle_timeout_secs = defaults.idle_timeout_secs;
        }
        if self.close_pool_size == 0 {
            self.close_pool_size = defaults.close_pool_size;
        }
    }
}
