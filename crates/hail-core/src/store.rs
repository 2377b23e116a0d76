//! The `LocationStore` trait implemented by persistence backends.
//!
//! The tracker depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  geo::Bounds,
  location::{LocationRecord, Nearby, ProximityQuery},
  role::Role,
};

/// Persistence for location samples.
///
/// A backend keeps two structures: a per-subject "latest" slot, replaced
/// atomically on every write, and an append-only history used for track
/// reconstruction. Because the latest slot is keyed by subject there can never
/// be more than one active record for a subject.
pub trait LocationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Replace the subject's latest slot with `record` (unless the slot already
  /// holds a newer sample) and append `record` to history, atomically.
  fn record<'a>(
    &'a self,
    record: &'a LocationRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The subject's latest sample, active or not.
  fn latest<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Option<LocationRecord>, Self::Error>> + Send + 'a;

  /// Active latest samples within `query.radius_m` meters of `query.center`,
  /// sorted with [`crate::location::sort_by_proximity`].
  fn nearby(
    &self,
    query: ProximityQuery,
  ) -> impl Future<Output = Result<Vec<Nearby>, Self::Error>> + Send + '_;

  /// Active latest samples inside `bounds` captured at or after
  /// `captured_after`.
  fn in_bounds(
    &self,
    bounds: Bounds,
    role: Role,
    captured_after: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<LocationRecord>, Self::Error>> + Send + '_;

  /// Every history sample tagged with `ride_id`, oldest first.
  fn ride_track<'a>(
    &'a self,
    ride_id: &'a str,
  ) -> impl Future<Output = Result<Vec<LocationRecord>, Self::Error>> + Send + 'a;

  /// History samples for a subject in `[from, to]`, oldest first.
  fn subject_history<'a>(
    &'a self,
    subject_id: &'a str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<LocationRecord>, Self::Error>> + Send + 'a;

  /// Clear the active flag on the subject's latest slot. Returns whether a
  /// slot existed.
  fn deactivate<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Delete history captured strictly before `before`. Returns rows removed.
  fn prune_history(
    &self,
    before: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}
