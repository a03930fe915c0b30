use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of attempts a coordinator makes before giving up on serialization conflicts.
pub const ITERATIONS: usize = 10;

/// Default time a lock acquisition may wait for tables held elsewhere.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Tuning knobs for a [`Coordinator`](crate::Coordinator).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Attempts made when the engine keeps reporting serialization conflicts.
    pub iterations: usize,
    /// Wait budget handed to the database for every lock acquisition.
    pub lock_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            iterations: ITERATIONS,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }
}
