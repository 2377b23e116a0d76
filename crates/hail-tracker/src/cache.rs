//! In-process TTL cache for latest locations.

use std::{collections::HashMap, convert::Infallible, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use hail_core::{
  cache::{Generation, LocationCache, Lookup},
  clock::{Clock, SystemClock},
  location::LocationRecord,
};
use parking_lot::Mutex;

/// How long an invalidation is remembered for a subject with no entry.
const TOMBSTONE_TTL: Duration = Duration::seconds(60);
/// Minimum spacing between expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::seconds(30);

struct Slot {
  /// `None` for a tombstone left by an invalidation.
  record:     Option<LocationRecord>,
  generation: u64,
  expires_at: DateTime<Utc>,
}

struct State {
  slots:      HashMap<String, Slot>,
  /// Bumped by every invalidation.
  epoch:      u64,
  /// Highest generation of any swept slot. Fills for a subject without a
  /// slot must have been observed at or after it.
  floor:      u64,
  next_sweep: DateTime<Utc>,
}

impl State {
  fn sweep(&mut self, now: DateTime<Utc>) {
    let mut floor = self.floor;
    self.slots.retain(|_, slot| {
      let live = slot.expires_at > now;
      if !live {
        floor = floor.max(slot.generation);
      }
      live
    });
    self.floor = floor;
    self.next_sweep = now + SWEEP_INTERVAL;
  }
}

/// A `HashMap` cache with per-entry expiry and invalidation tombstones.
/// Expired entries are swept by `put`.
pub struct MemoryCache {
  state: Mutex<State>,
  clock: Arc<dyn Clock>,
}

impl MemoryCache {
  pub fn new() -> Self { Self::with_clock(Arc::new(SystemClock)) }

  pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
    let next_sweep = clock.now() + SWEEP_INTERVAL;
    Self {
      state: Mutex::new(State { slots: HashMap::new(), epoch: 0, floor: 0, next_sweep }),
      clock,
    }
  }

  /// Number of cached records, expired or not. Tombstones are not counted.
  pub fn len(&self) -> usize {
    self.state.lock().slots.values().filter(|s| s.record.is_some()).count()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  #[cfg(test)]
  fn slot_count(&self) -> usize { self.state.lock().slots.len() }
}

impl Default for MemoryCache {
  fn default() -> Self { Self::new() }
}

impl LocationCache for MemoryCache {
  type Error = Infallible;

  async fn get(&self, subject_id: &str) -> Result<Lookup, Infallible> {
    let now = self.clock.now();
    let state = self.state.lock();
    match state.slots.get(subject_id) {
      Some(Slot { record: Some(record), expires_at, .. }) if *expires_at > now => {
        Ok(Lookup::Hit(record.clone()))
      }
      _ => Ok(Lookup::Miss(Generation(state.epoch))),
    }
  }

  async fn put(
    &self,
    record: &LocationRecord,
    ttl: Duration,
    observed: Generation,
  ) -> Result<bool, Infallible> {
    let now = self.clock.now();
    let mut state = self.state.lock();
    if now >= state.next_sweep {
      state.sweep(now);
    }

    let current = match state.slots.get(&record.subject_id) {
      Some(slot) => slot.generation,
      None => state.floor,
    };
    if observed.0 < current {
      return Ok(false);
    }

    state.slots.insert(
      record.subject_id.clone(),
      Slot { record: Some(record.clone()), generation: observed.0, expires_at: now + ttl },
    );
    Ok(true)
  }

  async fn invalidate(&self, subject_id: &str) -> Result<(), Infallible> {
    let expires_at = self.clock.now() + TOMBSTONE_TTL;
    let mut state = self.state.lock();
    state.epoch += 1;
    let generation = state.epoch;
    state.slots.insert(subject_id.to_owned(), Slot { record: None, generation, expires_at });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use hail_core::{Role, clock::ManualClock, geo::Coordinates};

  use super::*;

  fn record(subject: &str, clock: &ManualClock) -> LocationRecord {
    LocationRecord {
      subject_id:  subject.into(),
      role:        Role::Driver,
      coordinates: Coordinates { lat: 1.0, lng: 2.0 },
      ride_id:     None,
      captured_at: clock.now(),
      active:      true,
    }
  }

  fn cache() -> (MemoryCache, ManualClock) {
    let clock = ManualClock::default();
    (MemoryCache::with_clock(Arc::new(clock.clone())), clock)
  }

  async fn observe(cache: &MemoryCache, subject: &str) -> Generation {
    match cache.get(subject).await.unwrap() {
      Lookup::Miss(generation) => generation,
      Lookup::Hit(_) => panic!("expected a miss for {subject}"),
    }
  }

  #[tokio::test]
  async fn entries_expire_after_ttl() {
    let (cache, clock) = cache();
    let g = observe(&cache, "D1").await;
    assert!(cache.put(&record("D1", &clock), Duration::minutes(5), g).await.unwrap());

    assert!(matches!(cache.get("D1").await.unwrap(), Lookup::Hit(_)));
    clock.advance(Duration::minutes(6));
    assert!(matches!(cache.get("D1").await.unwrap(), Lookup::Miss(_)));
  }

  #[tokio::test]
  async fn invalidate_removes_entry() {
    let (cache, clock) = cache();
    let g = observe(&cache, "D1").await;
    cache.put(&record("D1", &clock), Duration::minutes(5), g).await.unwrap();
    cache.invalidate("D1").await.unwrap();
    assert!(matches!(cache.get("D1").await.unwrap(), Lookup::Miss(_)));
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn fill_observed_before_invalidation_is_refused() {
    let (cache, clock) = cache();
    let before = observe(&cache, "D1").await;
    cache.invalidate("D1").await.unwrap();

    assert!(!cache.put(&record("D1", &clock), Duration::minutes(5), before).await.unwrap());
    assert!(matches!(cache.get("D1").await.unwrap(), Lookup::Miss(_)));

    let after = observe(&cache, "D1").await;
    assert!(cache.put(&record("D1", &clock), Duration::minutes(5), after).await.unwrap());
  }

  #[tokio::test]
  async fn invalidating_one_subject_does_not_block_others() {
    let (cache, clock) = cache();
    let g = observe(&cache, "D2").await;
    cache.invalidate("D1").await.unwrap();
    assert!(cache.put(&record("D2", &clock), Duration::minutes(5), g).await.unwrap());
  }

  #[tokio::test]
  async fn put_sweeps_expired_entries_and_tombstones() {
    let (cache, clock) = cache();
    let g = observe(&cache, "D1").await;
    cache.put(&record("D1", &clock), Duration::minutes(5), g).await.unwrap();
    cache.invalidate("D2").await.unwrap();
    assert_eq!(cache.slot_count(), 2);

    clock.advance(Duration::minutes(6));
    let g = observe(&cache, "D3").await;
    cache.put(&record("D3", &clock), Duration::minutes(5), g).await.unwrap();
    assert_eq!(cache.slot_count(), 1);
    assert_eq!(cache.len(), 1);
  }

  #[tokio::test]
  async fn fill_straddling_a_swept_tombstone_is_refused() {
    let (cache, clock) = cache();
    let before = observe(&cache, "D1").await;
    cache.invalidate("D1").await.unwrap();

    clock.advance(Duration::minutes(2));
    let g = observe(&cache, "D2").await;
    cache.put(&record("D2", &clock), Duration::minutes(5), g).await.unwrap();
    assert_eq!(cache.slot_count(), 1);

    assert!(!cache.put(&record("D1", &clock), Duration::minutes(5), before).await.unwrap());
  }
}
