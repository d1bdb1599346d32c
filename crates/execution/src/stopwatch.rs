//! Pausable duration accumulator.

use std::time::Duration;
use tokio::time::Instant;

/// Accumulates time across start/stop intervals.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    /// Start (or keep) running.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stop running, keeping the accumulated time.
    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Check if running.
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Accumulated time, including the current interval.
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Stop and clear.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
