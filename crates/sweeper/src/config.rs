//! Event loop configuration.

use std::time::Duration;

/// Tuning for [`Server`](crate::Server).
///
/// The idle limit is `idle_wait * max_idle_rechecks`, about 2 s with the
/// defaults. A driver that awaits an outside future (a timer, a socket)
/// with nothing in flight for longer than that ends the run as `Stalled`.
/// Raise `max_idle_rechecks` for such drivers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pause before re-checking when nothing is in flight but the driver
    /// is still suspended.
    pub idle_wait: Duration,
    /// Consecutive idle re-checks before giving up with `Stalled`. Any
    /// round with work in flight resets the count.
    pub max_idle_rechecks: u32,
    /// Send an empty batch on rounds with nothing new to submit.
    pub keepalive_batches: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(100),
            max_idle_rechecks: 20,
            keepalive_batches: true,
        }
    }
}

impl ServerConfig {
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn with_max_idle_rechecks(mut self, n: u32) -> Self {
        self.max_idle_rechecks = n;
        self
    }

    pub fn with_keepalive_batches(mut self, enabled: bool) -> Self {
        self.keepalive_batches = enabled;
        self
    }
}
