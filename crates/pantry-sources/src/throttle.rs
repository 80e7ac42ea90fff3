//! Per-source "do not call before" gate set by rate-limit signals

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Used when upstream throttles without saying for how long
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(30);

/// Remembers, per source name, the earliest instant it may be called again
#[derive(Debug, Default)]
pub struct ThrottleGate {
    closed_until: Mutex<HashMap<String, Instant>>,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate for `source` for `wait` (or [`DEFAULT_THROTTLE`]).
    /// A later deadline already in place is kept.
    pub fn close(&self, source: &str, wait: Option<Duration>) {
        let until = Instant::now() + wait.unwrap_or(DEFAULT_THROTTLE);
        let mut gates = self.lock();
        let entry = gates.entry(source.to_string()).or_insert(until);
        if *entry < until {
            *entry = until;
        }
        info!(source, ?wait, "Throttle gate closed");
    }

    /// Time left before `source` may be called; `None` when open
    pub fn remaining(&self, source: &str) -> Option<Duration> {
        let mut gates = self.lock();
        let until = *gates.get(source)?;
        let now = Instant::now();
        if until <= now {
            gates.remove(source);
            return None;
        }
        Some(until - now)
    }

    pub fn is_open(&self, source: &str) -> bool {
        self.remaining(source).is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        // The map is always left consistent, so a poisoned lock is still usable
        self.closed_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
