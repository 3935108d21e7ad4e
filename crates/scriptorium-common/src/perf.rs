//! Timing helpers for instrumentation.
//!
//! `web_time::Instant` keeps this usable from wasm hosts as well as native builds.

use std::sync::OnceLock;

use web_time::Instant;

/// Milliseconds elapsed since the first call in this process.
pub fn now() -> f64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_secs_f64() * 1000.0
}

/// Logs elapsed time when dropped.
pub struct TimingGuard {
    label: &'static str,
    start: f64,
}

impl TimingGuard {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: now(),
        }
    }

    /// Milliseconds since the guard was created.
    pub fn elapsed_ms(&self) -> f64 {
        now() - self.start
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.elapsed_ms(), "{}", self.label);
    }
}
