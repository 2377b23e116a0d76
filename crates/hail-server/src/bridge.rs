//! [`PresenceBridge`]: the in-process producer API.
//!
//! Ride, dispatch and notification services publish through the bridge
//! instead of touching the hub directly, and location writes go through it so
//! that every accepted sample is fanned out to the rides the subject is on.

use std::{collections::BTreeSet, sync::Arc};

use hail_core::{
  Result, Role, RoomId,
  cache::LocationCache,
  envelope::{Envelope, LocationUpdate, Payload},
  geo::Coordinates,
  location::LocationRecord,
  room::RoomKind,
  store::LocationStore,
};
use hail_hub::{Hub, PublishReport};
use hail_tracker::LocationTracker;
use tracing::debug;

/// Result of a bridged location write.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationBroadcast {
  pub record:    LocationRecord,
  /// Ride rooms the update was published to, sorted.
  pub rooms:     Vec<RoomId>,
  pub delivered: usize,
}

pub struct PresenceBridge<S, C> {
  hub:     Hub,
  tracker: Arc<LocationTracker<S, C>>,
}

impl<S, C> Clone for PresenceBridge<S, C> {
  fn clone(&self) -> Self {
    Self { hub: self.hub.clone(), tracker: self.tracker.clone() }
  }
}

impl<S, C> PresenceBridge<S, C>
where
  S: LocationStore,
  C: LocationCache,
{
  pub fn new(hub: Hub, tracker: Arc<LocationTracker<S, C>>) -> Self { Self { hub, tracker } }

  pub fn hub(&self) -> &Hub { &self.hub }

  pub fn tracker(&self) -> &LocationTracker<S, C> { &self.tracker }

  pub fn publish_to_room(&self, room: RoomId, envelope: Envelope) -> PublishReport {
    self.hub.publish_to_room(room, envelope)
  }

  pub fn publish_to_user(&self, subject_id: &str, envelope: Envelope) -> PublishReport {
    self.hub.publish_to_user(subject_id, envelope)
  }

  /// Persist a sample, then publish a `location_update` to `ride:<ride_id>`
  /// and to every other ride room the subject's connections are in.
  ///
  /// Nothing is published if the write fails. Membership of the explicit
  /// ride room is not checked here; websocket clients are checked by
  /// [`crate::dispatch`].
  pub async fn record_location(
    &self,
    subject_id: &str,
    role: Role,
    coordinates: Coordinates,
    ride_id: Option<&str>,
  ) -> Result<LocationBroadcast> {
    let record = self
      .tracker
      .record_location(subject_id, role, coordinates, ride_id)
      .await?;

    let mut rooms: BTreeSet<RoomId> = self
      .hub
      .subject_rooms(subject_id)
      .into_iter()
      .filter(|room| room.kind() == RoomKind::Ride)
      .collect();
    if let Some(ride_id) = ride_id {
      rooms.insert(RoomId::ride(ride_id));
    }

    let envelope = location_envelope(&record);
    let mut delivered = 0;
    for room in &rooms {
      delivered += self.hub.publish_to_room(room.clone(), envelope.clone()).delivered;
    }
    debug!(subject_id, rooms = rooms.len(), delivered, "location update fanned out");

    Ok(LocationBroadcast { record, rooms: rooms.into_iter().collect(), delivered })
  }

  /// Take the subject out of proximity results until its next sample.
  pub async fn go_offline(&self, subject_id: &str) -> Result<bool> {
    self.tracker.deactivate(subject_id).await
  }
}

fn location_envelope(record: &LocationRecord) -> Envelope {
  let mut envelope = Envelope::new(Payload::LocationUpdate(LocationUpdate {
    lat:         record.coordinates.lat,
    lng:         record.coordinates.lng,
    ride_id:     record.ride_id.clone(),
    captured_at: Some(record.captured_at),
  }))
  .from_subject(record.subject_id.clone());
  envelope.timestamp = record.captured_at;
  envelope
}
