//! Location samples and the query types the store answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{geo::Coordinates, role::Role};

/// One position sample for a subject.
///
/// The store keeps exactly one "latest" record per subject (the only one that
/// can be `active`) plus an append-only history of every sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
  pub subject_id:  String,
  pub role:        Role,
  pub coordinates: Coordinates,
  pub ride_id:     Option<String>,
  /// Tracker-assigned timestamp.
  pub captured_at: DateTime<Utc>,
  pub active:      bool,
}

impl LocationRecord {
  /// Whether this sample counts towards presence at `now` under `window`.
  pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    self.active && self.captured_at >= now - window
  }
}

/// Parameters for [`crate::store::LocationStore::nearby`].
#[derive(Debug, Clone, Copy)]
pub struct ProximityQuery {
  pub center:         Coordinates,
  /// Radius in meters.
  pub radius_m:       f64,
  pub role:           Role,
  /// Only active samples captured at or after this instant qualify.
  pub captured_after: DateTime<Utc>,
}

/// A latest-location record with its distance from a query center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nearby {
  pub record:     LocationRecord,
  pub distance_m: f64,
}

impl Nearby {
  pub fn distance_km(&self) -> f64 { crate::geo::m_to_km(self.distance_m) }
}

/// Sort proximity hits: distance ascending, ties broken by most recent sample.
pub fn sort_by_proximity(hits: &mut [Nearby]) {
  hits.sort_by(|a, b| {
    a.distance_m
      .total_cmp(&b.distance_m)
      .then_with(|| b.record.captured_at.cmp(&a.record.captured_at))
  });
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  fn record(id: &str, secs: i64) -> LocationRecord {
    LocationRecord {
      subject_id:  id.into(),
      role:        Role::Driver,
      coordinates: Coordinates { lat: 0.0, lng: 0.0 },
      ride_id:     None,
      captured_at: Utc.timestamp_opt(secs, 0).unwrap(),
      active:      true,
    }
  }

  #[test]
  fn ties_prefer_most_recent() {
    let mut hits = vec![
      Nearby { record: record("old", 100), distance_m: 10.0 },
      Nearby { record: record("far", 300), distance_m: 50.0 },
      Nearby { record: record("new", 200), distance_m: 10.0 },
    ];
    sort_by_proximity(&mut hits);
    let ids: Vec<_> = hits.iter().map(|h| h.record.subject_id.as_str()).collect();
    assert_eq!(ids, ["new", "old", "far"]);
  }

  #[test]
  fn inactive_is_never_fresh() {
    let mut r = record("d", 1_000);
    let now = r.captured_at;
    assert!(r.is_fresh(now, Duration::minutes(15)));
    r.active = false;
    assert!(!r.is_fresh(now, Duration::minutes(15)));
  }
}
