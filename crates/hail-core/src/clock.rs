//! Wall-clock abstraction used for `captured_at` stamps and freshness checks.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to. Cloning shares the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self { now: Arc::new(Mutex::new(start)) }
  }

  pub fn advance(&self, by: Duration) { *self.now.lock() += by; }

  pub fn set(&self, to: DateTime<Utc>) { *self.now.lock() = to; }
}

impl Default for ManualClock {
  /// Starts at the current second.
  fn default() -> Self { Self::new(Utc::now().trunc_subsecs(0)) }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> { *self.now.lock() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_advances_shared_instant() {
    let clock = ManualClock::default();
    let other = clock.clone();
    let start = clock.now();
    other.advance(Duration::minutes(16));
    assert_eq!(clock.now() - start, Duration::minutes(16));
  }
}
