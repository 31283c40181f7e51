//! Process-wide counters for refinement activity.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] logs them all
//! as one `info!` event, typically at the end of a CLI command.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    rounds_committed: AtomicU64,
    sessions_converged: AtomicU64,
    sessions_exhausted: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_cancelled: AtomicU64,
    generator_fallbacks: AtomicU64,
    store_write_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            rounds_committed: AtomicU64::new(0),
            sessions_converged: AtomicU64::new(0),
            sessions_exhausted: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_cancelled: AtomicU64::new(0),
            generator_fallbacks: AtomicU64::new(0),
            store_write_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_rounds(&self) {
        self.rounds_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rounds_committed", "counter incremented");
    }

    pub fn inc_converged(&self) {
        self.sessions_converged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_exhausted(&self) {
        self.sessions_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cancelled(&self) {
        self.sessions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallbacks(&self) {
        self.generator_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "generator_fallbacks", "counter incremented");
    }

    pub fn inc_store_write_failures(&self) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "store_write_failures", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            rounds_committed = self.rounds_committed(),
            sessions_converged = self.sessions_converged(),
            sessions_exhausted = self.sessions_exhausted(),
            sessions_failed = self.sessions_failed(),
            sessions_cancelled = self.sessions_cancelled(),
            generator_fallbacks = self.generator_fallbacks(),
            store_write_failures = self.store_write_failures(),
        );
    }

    pub fn rounds_committed(&self) -> u64 {
        self.rounds_committed.load(Ordering::Relaxed)
    }

    pub fn sessions_converged(&self) -> u64 {
        self.sessions_converged.load(Ordering::Relaxed)
    }

    pub fn sessions_exhausted(&self) -> u64 {
        self.sessions_exhausted.load(Ordering::Relaxed)
    }

    pub fn sessions_failed(&self) -> u64 {
        self.sessions_failed.load(Ordering::Relaxed)
    }

    pub fn sessions_cancelled(&self) -> u64 {
        self.sessions_cancelled.load(Ordering::Relaxed)
    }

    pub fn generator_fallbacks(&self) -> u64 {
        self.generator_fallbacks.load(Ordering::Relaxed)
    }

    pub fn store_write_failures(&self) -> u64 {
        self.store_write_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.rounds_committed,
            &self.sessions_converged,
            &self.sessions_exhausted,
            &self.sessions_failed,
            &self.sessions_cancelled,
            &self.generator_fallbacks,
            &self.store_write_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_rounds();
        m.inc_rounds();
        m.inc_fallbacks();
        m.inc_store_write_failures();
        assert_eq!(m.rounds_committed(), 2);
        assert_eq!(m.generator_fallbacks(), 1);
        assert_eq!(m.store_write_failures(), 1);
        assert_eq!(m.sessions_converged(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_converged();
        m.inc_exhausted();
        m.inc_failed();
        m.inc_cancelled();
        m.reset();
        assert_eq!(m.sessions_converged(), 0);
        assert_eq!(m.sessions_exhausted(), 0);
        assert_eq!(m.sessions_failed(), 0);
        assert_eq!(m.sessions_cancelled(), 0);
    }
}
