//! Per-worker backoff bookkeeping (spec §4.4 "Backoff").

use std::time::Duration;

use crate::topology::BackoffConfig;

/// Tracks the current retry attempt for one arrow assignment. Resets on
/// any `KeepGoing`; grows on each `ComeBackLater` up to `tries`.
pub struct BackoffState {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        BackoffState { config, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.tries
    }

    /// Delay for the current attempt, then advance to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.config.delay_for(self.attempt);
        self.attempt += 1;
        d
    }
}
