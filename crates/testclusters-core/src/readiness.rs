//! Readiness gate: named predicates polled until they hold (no fixed sleeps).

use std::fmt;

use tokio::time::{Duration, Instant, sleep};

use crate::error::{LifecycleError, Result};

/// Base time a node gets to come up.
pub const NODE_UP_TIMEOUT: Duration = Duration::from_secs(120);

/// Extra time granted per plugin, secure file, secure setting and user.
pub const ADDITIONAL_CONFIG_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay between polls of a failing condition.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Backoff configuration for the poll loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second poll.
    pub initial: Duration,
    /// Maximum delay between polls.
    pub max: Duration,
    /// Multiplicative factor for backoff growth; `1` keeps a fixed interval.
    pub factor: u32,
}

impl Backoff {
    /// Fixed-interval backoff.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            factor: 1,
        }
    }

    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(self.factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL)
    }
}

/// `base + per_unit * units`, the deadline for a node with `units` pieces of
/// setup work.
#[must_use]
pub fn readiness_timeout(base: Duration, per_unit: Duration, units: usize) -> Duration {
    let units = u32::try_from(units).unwrap_or(u32::MAX);
    base.saturating_add(per_unit.saturating_mul(units))
}

type Condition = Box<dyn FnMut() -> bool + Send>;

/// Ordered set of named readiness conditions.
pub struct ReadinessGate {
    conditions: Vec<(String, Condition)>,
    backoff: Backoff,
}

impl ReadinessGate {
    #[must_use]
    pub fn new() -> Self {
        Self::with_backoff(Backoff::default())
    }

    #[must_use]
    pub fn with_backoff(backoff: Backoff) -> Self {
        Self {
            conditions: Vec::new(),
            backoff,
        }
    }

    /// Add a condition; conditions are awaited in the order they were added.
    #[must_use]
    pub fn condition<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.conditions.push((name.into(), Box::new(check)));
        self
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.conditions.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Poll each condition in turn until all hold or `timeout` elapses.
    pub async fn wait_for(&mut self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let deadline = start + timeout;

        for (name, check) in &mut self.conditions {
            let mut delay = self.backoff.initial;
            let mut polls = 0usize;
            loop {
                polls += 1;
                if check() {
                    tracing::debug!(condition = %name, polls, "Readiness condition met");
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(LifecycleError::ReadinessTimeout {
                        condition: name.clone(),
                        elapsed_ms: now.saturating_duration_since(start).as_millis(),
                    }
                    .into());
                }
                let sleep_for = delay.min(deadline.saturating_duration_since(now));
                if !sleep_for.is_zero() {
                    sleep(sleep_for).await;
                }
                delay = self.backoff.next_delay(delay);
            }
        }
        Ok(())
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("conditions", &self.names())
            .field("backoff", &self.backoff)
            .finish()
    }
}
