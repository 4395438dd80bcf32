//! Reconnect policy for the replication session

use std::time::Duration;

use crate::common::config::ReplicationConfig;

/// Golden ratio conjugate, spreads jitter offsets evenly over [0, 1)
const JITTER_STEP: f64 = 0.618_033_988_749_895;

/// Delay schedule between replication reconnects.
///
/// Delays double from `base` up to `max`. Jitter is deterministic and
/// seeded with the replica's server id, so replicas restarted together
/// spread their reconnects without a random source. The failure count only
/// starts over once a connection delivered an event: a source that accepts
/// the dump and drops it straight away keeps backing off.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
    seed: u32,
    max_attempts: Option<u32>,
    failures: u32,
}

impl ReconnectPolicy {
    /// Plain doubling without jitter or attempt limit
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
            seed: 0,
            max_attempts: None,
            failures: 0,
        }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_max)
            .with_jitter(config.backoff_jitter)
            .with_seed(config.server_id)
            .with_max_attempts(config.max_reconnect_attempts)
    }

    /// Fraction of the delay (0.0 - 1.0) the jitter may add or remove
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Record a failed connection and return the delay before the next
    /// one, or `None` once `max_attempts` consecutive connections failed.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.max_attempts.is_some_and(|max| self.failures > max) {
            return None;
        }
        Some(self.delay(self.failures - 1))
    }

    /// The stream made progress; the next failure starts from `base`.
    pub fn on_progress(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the stream last made progress
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay after the `n`th consecutive failure, counted from zero.
    pub fn delay(&self, n: u32) -> Duration {
        let capped = self.base.saturating_mul(2u32.saturating_pow(n)).min(self.max);
        if self.jitter == 0.0 {
            return capped;
        }
        let offset = (f64::from(n.wrapping_add(self.seed)) * JITTER_STEP).fract();
        let factor = 1.0 + self.jitter * (offset * 2.0 - 1.0);
        Duration::from_secs_f64(capped.as_secs_f64() * factor).min(self.max)
    }
}
