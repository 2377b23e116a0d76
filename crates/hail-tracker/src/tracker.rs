//! [`LocationTracker`] — validation, supersession, read-through caching and
//! proximity queries on top of a [`LocationStore`].
//!
//! Store calls are bounded by [`TrackerConfig::store_timeout`] and surface as
//! [`Error::StorageUnavailable`]; they are never retried here. Cache calls are
//! bounded by [`TrackerConfig::cache_timeout`] and any failure is logged and
//! treated as a miss.

use std::{future::Future, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use hail_core::{
  Error, Result, Role,
  cache::{Generation, LocationCache, Lookup},
  clock::{Clock, SystemClock},
  geo::{Bounds, Coordinates, km_to_m},
  location::{LocationRecord, Nearby, ProximityQuery},
  store::LocationStore,
};
use tracing::{debug, warn};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrackerConfig {
  /// Lifetime of a cached latest location.
  pub cache_ttl:         Duration,
  pub store_timeout:     StdDuration,
  pub cache_timeout:     StdDuration,
  /// History older than this is removed by [`LocationTracker::prune_history`].
  pub history_retention: Duration,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      cache_ttl:         Duration::minutes(10),
      store_timeout:     StdDuration::from_secs(2),
      cache_timeout:     StdDuration::from_millis(250),
      history_retention: Duration::hours(72),
    }
  }
}

/// A subject's latest sample joined with the role freshness predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceSnapshot {
  pub record:  LocationRecord,
  pub present: bool,
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

pub struct LocationTracker<S, C> {
  store:  S,
  cache:  C,
  clock:  Arc<dyn Clock>,
  config: TrackerConfig,
}

impl<S, C> LocationTracker<S, C>
where
  S: LocationStore,
  C: LocationCache,
{
  pub fn new(store: S, cache: C, config: TrackerConfig) -> Self {
    Self::with_clock(store, cache, config, Arc::new(SystemClock))
  }

  pub fn with_clock(store: S, cache: C, config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
    Self { store, cache, clock, config }
  }

  pub fn config(&self) -> &TrackerConfig { &self.config }

  pub fn now(&self) -> DateTime<Utc> { self.clock.now() }

  // ── Writes ──────────────────────────────────────────────────────────────

  /// Validate and persist a position sample as the subject's latest, append
  /// it to history and drop the cached latest entry.
  ///
  /// The cache is invalidated even when the store call fails or times out,
  /// since a timed-out write may still commit.
  pub async fn record_location(
    &self,
    subject_id: &str,
    role: Role,
    coordinates: Coordinates,
    ride_id: Option<&str>,
  ) -> Result<LocationRecord> {
    coordinates.validate()?;

    let record = LocationRecord {
      subject_id: subject_id.to_owned(),
      role,
      coordinates,
      ride_id: ride_id.map(str::to_owned),
      // Storage precision.
      captured_at: self.clock.now().trunc_subsecs(6),
      active: true,
    };

    let written = self.bounded_store(self.store.record(&record)).await;
    self.invalidate(subject_id).await;
    written?;
    debug!(subject_id, %role, "location recorded");
    Ok(record)
  }

  /// Mark the subject's latest sample inactive (e.g. a driver going offline).
  pub async fn deactivate(&self, subject_id: &str) -> Result<bool> {
    let existed = self.bounded_store(self.store.deactivate(subject_id)).await;
    self.invalidate(subject_id).await;
    existed
  }

  /// Remove history older than the retention window.
  pub async fn prune_history(&self) -> Result<u64> {
    let before = self.clock.now() - self.config.history_retention;
    self.bounded_store(self.store.prune_history(before)).await
  }

  // ── Reads ───────────────────────────────────────────────────────────────

  /// Cache-first read of the subject's latest sample.
  ///
  /// A store read only fills the cache when the cache reported a miss and
  /// the subject was not invalidated while the read was in flight.
  pub async fn latest_location(&self, subject_id: &str) -> Result<LocationRecord> {
    let lookup = tokio::time::timeout(self.config.cache_timeout, self.cache.get(subject_id)).await;
    let observed = match lookup {
      Ok(Ok(Lookup::Hit(hit))) => return Ok(hit),
      Ok(Ok(Lookup::Miss(generation))) => Some(generation),
      Ok(Err(e)) => {
        warn!(subject_id, error = %e, "location cache read failed");
        None
      }
      Err(_) => {
        warn!(subject_id, "location cache read timed out");
        None
      }
    };

    let record = self
      .bounded_store(self.store.latest(subject_id))
      .await?
      .ok_or_else(|| Error::NotFound(subject_id.to_owned()))?;

    if let Some(observed) = observed {
      self.fill(&record, observed).await;
    }
    Ok(record)
  }

  /// Latest sample plus whether it is fresh enough to count as present.
  pub async fn presence(&self, subject_id: &str) -> Result<PresenceSnapshot> {
    let record  = self.latest_location(subject_id).await?;
    let present = record.is_fresh(self.clock.now(), record.role.freshness_window());
    Ok(PresenceSnapshot { record, present })
  }

  /// Active subjects of `role` within `radius_km` of `center`, nearest first,
  /// with their distances.
  ///
  /// `freshness` defaults to the role's window.
  pub async fn nearby(
    &self,
    center: Coordinates,
    radius_km: f64,
    role: Role,
    freshness: Option<Duration>,
  ) -> Result<Vec<Nearby>> {
    center.validate()?;
    if !radius_km.is_finite() || radius_km < 0.0 {
      return Err(Error::InvalidRadius(radius_km));
    }

    let window = freshness.unwrap_or_else(|| role.freshness_window());
    let query = ProximityQuery {
      center,
      radius_m: km_to_m(radius_km),
      role,
      captured_after: self.clock.now() - window,
    };
    self.bounded_store(self.store.nearby(query)).await
  }

  /// Subject ids only, in the same order as [`Self::nearby`].
  pub async fn nearby_subjects(
    &self,
    center: Coordinates,
    radius_km: f64,
    role: Role,
    freshness: Option<Duration>,
  ) -> Result<Vec<String>> {
    Ok(
      self
        .nearby(center, radius_km, role, freshness)
        .await?
        .into_iter()
        .map(|n| n.record.subject_id)
        .collect(),
    )
  }

  /// Fresh, active subjects of `role` inside `bounds`.
  pub async fn subjects_in_bounds(
    &self,
    bounds: Bounds,
    role: Role,
  ) -> Result<Vec<LocationRecord>> {
    let captured_after = self.clock.now() - role.freshness_window();
    self
      .bounded_store(self.store.in_bounds(bounds, role, captured_after))
      .await
  }

  /// Every sample recorded for a ride, oldest first.
  pub async fn ride_track(&self, ride_id: &str) -> Result<Vec<LocationRecord>> {
    self.bounded_store(self.store.ride_track(ride_id)).await
  }

  /// Explicit date-range history. No freshness filter applies.
  pub async fn subject_history(
    &self,
    subject_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<LocationRecord>> {
    self
      .bounded_store(self.store.subject_history(subject_id, from, to))
      .await
  }

  // ── Helpers ─────────────────────────────────────────────────────────────

  async fn bounded_store<T>(
    &self,
    op: impl Future<Output = Result<T, S::Error>>,
  ) -> Result<T> {
    match tokio::time::timeout(self.config.store_timeout, op).await {
      Ok(res) => res.map_err(Error::storage),
      Err(elapsed) => Err(Error::storage(elapsed)),
    }
  }

  async fn fill(&self, record: &LocationRecord, observed: Generation) {
    let subject_id = record.subject_id.as_str();
    let put = self.cache.put(record, self.config.cache_ttl, observed);
    match tokio::time::timeout(self.config.cache_timeout, put).await {
      Ok(Ok(true)) => {}
      Ok(Ok(false)) => debug!(subject_id, "cache fill skipped after concurrent invalidation"),
      Ok(Err(e)) => warn!(subject_id, error = %e, "location cache write failed"),
      Err(_) => warn!(subject_id, "location cache write timed out"),
    }
  }

  async fn invalidate(&self, subject_id: &str) {
    match tokio::time::timeout(self.config.cache_timeout, self.cache.invalidate(subject_id)).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(subject_id, error = %e, "location cache invalidation failed"),
      Err(_) => warn!(subject_id, "location cache invalidation timed out"),
    }
  }
}
