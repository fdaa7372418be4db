//! Engine tuning knobs.

use std::time::Duration;

/// Tuning parameters for a [`TreeModel`](crate::engine::TreeModel) or
/// [`ListModel`](crate::engine::ListModel).
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of items applied to the tree per drain tick. Bounds
    /// the width of a single structural-insert notification.
    pub drain_batch_cap: usize,
    /// Maximum number of items a worker forwards per queue message.
    pub worker_batch: usize,
    /// Number of background expansion threads.
    pub worker_threads: usize,
    /// Interval between drain ticks when driven by
    /// [`run_until_idle`](crate::engine::TreeModel::run_until_idle).
    pub tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drain_batch_cap: 128,
            worker_batch: 32,
            worker_threads: 4,
            tick_interval: Duration::from_millis(16),
        }
    }
}

impl Config {
    /// Smaller batches and a faster tick, for views that must stay
    /// responsive while results stream in.
    pub fn interactive() -> Self {
        Self {
            drain_batch_cap: 64,
            worker_batch: 16,
            worker_threads: 4,
            tick_interval: Duration::from_millis(8),
        }
    }

    /// Larger batches for headless consumers that only care about the
    /// finished tree.
    pub fn bulk() -> Self {
        Self {
            drain_batch_cap: 512,
            worker_batch: 128,
            worker_threads: 8,
            tick_interval: Duration::from_millis(2),
        }
    }
}
