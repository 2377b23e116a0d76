//! Inbound frame dispatch.
//!
//! Every decoded frame is routed by its `type`. Failures never close the
//! connection; they are answered with an error `notification` to the sender
//! alone.

use hail_core::{
  Role, RoomId,
  cache::LocationCache,
  envelope::{ChatMessage, Envelope, LocationUpdate, NotificationLevel, Payload},
  geo::Coordinates,
  room::RoomKind,
  store::LocationStore,
};
use hail_hub::{Connection, PublishReport};
use tracing::{debug, warn};

use crate::{bridge::PresenceBridge, error::Error};

/// What a frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
  Joined { room: RoomId, changed: bool },
  Left { room: RoomId, changed: bool },
  Located { rooms: Vec<RoomId> },
  Chat(PublishReport),
  /// Server-originated or unknown kind; not acted on.
  Ignored(String),
}

/// Decode and apply one inbound text frame, answering failures in-band.
pub async fn handle_frame<S, C>(bridge: &PresenceBridge<S, C>, conn: &Connection, text: &str)
where
  S: LocationStore,
  C: LocationCache,
{
  match dispatch(bridge, conn, text).await {
    Ok(Dispatched::Ignored(kind)) => {
      debug!(connection_id = %conn.id(), kind, "inbound frame ignored");
    }
    Ok(outcome) => debug!(connection_id = %conn.id(), ?outcome, "inbound frame handled"),
    Err(e) => {
      if e.is_internal() {
        warn!(connection_id = %conn.id(), subject_id = conn.subject_id(), error = %e, "inbound frame failed");
      } else {
        debug!(connection_id = %conn.id(), error = %e, "inbound frame rejected");
      }
      let notice = Envelope::notice(NotificationLevel::Error, e.to_string());
      if let Err(e) = bridge.hub().send_to(conn.id(), &notice) {
        debug!(connection_id = %conn.id(), error = %e, "error notice not delivered");
      }
    }
  }
}

pub async fn dispatch<S, C>(
  bridge: &PresenceBridge<S, C>,
  conn: &Connection,
  text: &str,
) -> Result<Dispatched, Error>
where
  S: LocationStore,
  C: LocationCache,
{
  let envelope: Envelope = serde_json::from_str(text)
    .map_err(|e| Error::BadRequest(format!("malformed envelope: {e}")))?;

  match envelope.payload {
    Payload::JoinRoom(r) => {
      check_self_managed(conn, &r.room_id)?;
      let changed = bridge.hub().join_room(conn.id(), r.room_id.clone())?;
      Ok(Dispatched::Joined { room: r.room_id, changed })
    }
    Payload::LeaveRoom(r) => {
      check_self_managed(conn, &r.room_id)?;
      let changed = bridge.hub().leave_room(conn.id(), &r.room_id)?;
      Ok(Dispatched::Left { room: r.room_id, changed })
    }
    Payload::LocationUpdate(update) => locate(bridge, conn, update).await,
    Payload::ChatMessage(chat) => chat_message(bridge, conn, chat),
    Payload::Welcome(_)
    | Payload::RideStatus(_)
    | Payload::Notification(_)
    | Payload::Unknown { .. } => Ok(Dispatched::Ignored(envelope.payload.kind().to_owned())),
  }
}

/// User and role rooms are assigned at registration; only admins may change
/// them by hand.
fn check_self_managed(conn: &Connection, room: &RoomId) -> Result<(), Error> {
  let reserved = matches!(room.kind(), RoomKind::User | RoomKind::Role);
  if reserved && conn.role() != Role::Admin {
    return Err(hail_core::Error::Unauthorized(format!("{room} is managed by the server")).into());
  }
  Ok(())
}

async fn locate<S, C>(
  bridge: &PresenceBridge<S, C>,
  conn: &Connection,
  update: LocationUpdate,
) -> Result<Dispatched, Error>
where
  S: LocationStore,
  C: LocationCache,
{
  if conn.role() != Role::Driver {
    return Err(hail_core::Error::Unauthorized("only drivers publish locations".into()).into());
  }
  let coordinates = Coordinates::new(update.lat, update.lng)?;
  if let Some(ride_id) = update.ride_id.as_deref() {
    let room = RoomId::ride(ride_id);
    if !bridge.hub().rooms_of(conn.id()).contains(&room) {
      return Err(hail_core::Error::Unauthorized(format!("not a member of {room}")).into());
    }
  }
  let out = bridge
    .record_location(conn.subject_id(), conn.role(), coordinates, update.ride_id.as_deref())
    .await?;
  Ok(Dispatched::Located { rooms: out.rooms })
}

fn chat_message<S, C>(
  bridge: &PresenceBridge<S, C>,
  conn: &Connection,
  chat: ChatMessage,
) -> Result<Dispatched, Error>
where
  S: LocationStore,
  C: LocationCache,
{
  let room = chat.room_id.clone();
  if !bridge.hub().rooms_of(conn.id()).contains(&room) {
    return Err(hail_core::Error::Unauthorized(format!("not a member of {room}")).into());
  }
  let envelope = Envelope::new(Payload::ChatMessage(chat)).from_subject(conn.subject_id());
  Ok(Dispatched::Chat(bridge.publish_to_room(room, envelope)))
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use hail_hub::{Frame, Hub, HubConfig};
  use hail_store_sqlite::SqliteLocationStore;
  use hail_tracker::{LocationTracker, MemoryCache, TrackerConfig};
  use serde_json::json;
  use tokio::sync::mpsc;

  use super::*;

  type Bridge = PresenceBridge<SqliteLocationStore, MemoryCache>;

  async fn bridge() -> Bridge {
    let store = SqliteLocationStore::open_in_memory().await.unwrap();
    let tracker = LocationTracker::new(store, MemoryCache::new(), TrackerConfig::default());
    PresenceBridge::new(Hub::start(HubConfig::default()), Arc::new(tracker))
  }

  fn connect(b: &Bridge, subject: &str, role: Role) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
    let (conn, mut rx) = b.hub().open_connection(subject, role);
    b.hub().register(conn.clone()).unwrap();
    // Discard the welcome.
    rx.try_recv().unwrap();
    (conn, rx)
  }

  fn next(rx: &mut mpsc::Receiver<Frame>) -> Option<Envelope> {
    rx.try_recv().ok().map(|f| serde_json::from_str(&f).unwrap())
  }

  fn frame(kind: &str, data: serde_json::Value) -> String {
    json!({ "type": kind, "data": data }).to_string()
  }

  fn is_error_notice(env: &Envelope) -> bool {
    matches!(&env.payload, Payload::Notification(n) if n.level == NotificationLevel::Error)
  }

  #[tokio::test]
  async fn join_and_leave_ride_room() {
    let b = bridge().await;
    let (conn, _rx) = connect(&b, "R1", Role::Rider);
    let ride = RoomId::ride("42");

    let joined = dispatch(&b, &conn, &frame("join_room", json!({ "room_id": "ride:42" }))).await;
    assert_eq!(joined.unwrap(), Dispatched::Joined { room: ride.clone(), changed: true });
    assert!(b.hub().rooms_of(conn.id()).contains(&ride));

    let left = dispatch(&b, &conn, &frame("leave_room", json!({ "room_id": "ride:42" }))).await;
    assert_eq!(left.unwrap(), Dispatched::Left { room: ride.clone(), changed: true });
    assert!(b.hub().room_members(&ride).is_empty());
  }

  #[tokio::test]
  async fn reserved_rooms_are_closed_to_non_admins() {
    let b = bridge().await;
    let (rider, _) = connect(&b, "R1", Role::Rider);
    let (admin, _) = connect(&b, "A1", Role::Admin);

    let spy = frame("join_room", json!({ "room_id": "user:R2" }));
    assert!(matches!(
      dispatch(&b, &rider, &spy).await,
      Err(Error::Core(hail_core::Error::Unauthorized(_)))
    ));
    let quit = frame("leave_room", json!({ "room_id": "user:R1" }));
    assert!(dispatch(&b, &rider, &quit).await.is_err());
    assert!(b.hub().rooms_of(rider.id()).contains(&RoomId::user("R1")));

    assert!(dispatch(&b, &admin, &frame("join_room", json!({ "room_id": "role:driver" }))).await.is_ok());
  }

  #[tokio::test]
  async fn rider_location_update_is_rejected_without_side_effects() {
    let b = bridge().await;
    let (rider, mut rx) = connect(&b, "R1", Role::Rider);
    let text = frame("location_update", json!({ "lat": 1.0, "lng": 2.0 }));

    handle_frame(&b, &rider, &text).await;

    let reply = next(&mut rx).unwrap();
    assert!(is_error_notice(&reply));
    assert!(matches!(
      b.tracker().latest_location("R1").await,
      Err(hail_core::Error::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn driver_location_update_is_stored_and_fanned_out() {
    let b = bridge().await;
    let (driver, _driver_rx) = connect(&b, "D1", Role::Driver);
    let (rider, mut rider_rx) = connect(&b, "R1", Role::Rider);
    b.hub().join_room(driver.id(), RoomId::ride("42")).unwrap();
    b.hub().join_room(rider.id(), RoomId::ride("42")).unwrap();

    let text = frame("location_update", json!({ "lat": 40.7, "lng": -74.0, "ride_id": "42" }));
    let out = dispatch(&b, &driver, &text).await.unwrap();
    assert_eq!(out, Dispatched::Located { rooms: vec![RoomId::ride("42")] });

    let latest = b.tracker().latest_location("D1").await.unwrap();
    assert_eq!(latest.coordinates, Coordinates { lat: 40.7, lng: -74.0 });
    assert_eq!(b.tracker().ride_track("42").await.unwrap().len(), 1);

    let update = next(&mut rider_rx).unwrap();
    assert_eq!(update.kind(), "location_update");
    assert_eq!(update.subject_id.as_deref(), Some("D1"));
  }

  #[tokio::test]
  async fn driver_outside_the_ride_cannot_publish_into_it() {
    let b = bridge().await;
    let (stranger, mut stranger_rx) = connect(&b, "D666", Role::Driver);
    let (rider, mut rider_rx) = connect(&b, "R1", Role::Rider);
    b.hub().join_room(rider.id(), RoomId::ride("42")).unwrap();

    let text = frame("location_update", json!({ "lat": 40.7, "lng": -74.0, "ride_id": "42" }));
    assert!(matches!(
      dispatch(&b, &stranger, &text).await,
      Err(Error::Core(hail_core::Error::Unauthorized(_)))
    ));

    handle_frame(&b, &stranger, &text).await;
    assert!(is_error_notice(&next(&mut stranger_rx).unwrap()));
    assert!(next(&mut rider_rx).is_none());
    assert!(b.tracker().ride_track("42").await.unwrap().is_empty());
    assert!(b.tracker().latest_location("D666").await.is_err());
  }

  #[tokio::test]
  async fn driver_location_without_ride_is_stored_only() {
    let b = bridge().await;
    let (driver, _rx) = connect(&b, "D1", Role::Driver);

    let text = frame("location_update", json!({ "lat": 1.0, "lng": 2.0 }));
    assert_eq!(dispatch(&b, &driver, &text).await.unwrap(), Dispatched::Located { rooms: vec![] });
    assert!(b.tracker().latest_location("D1").await.is_ok());
  }

  #[tokio::test]
  async fn out_of_range_location_is_answered_with_error() {
    let b = bridge().await;
    let (driver, mut rx) = connect(&b, "D1", Role::Driver);

    handle_frame(&b, &driver, &frame("location_update", json!({ "lat": 91.0, "lng": 0.0 }))).await;

    assert!(is_error_notice(&next(&mut rx).unwrap()));
    assert!(b.tracker().latest_location("D1").await.is_err());
  }

  #[tokio::test]
  async fn chat_requires_membership_and_stamps_sender() {
    let b = bridge().await;
    let (alice, mut alice_rx) = connect(&b, "R1", Role::Rider);
    let (bob, mut bob_rx) = connect(&b, "D1", Role::Driver);
    let room = RoomId::ride("42");
    b.hub().join_room(alice.id(), room.clone()).unwrap();

    let text = json!({
      "type": "chat_message",
      "subject_id": "someone-else",
      "data": { "room_id": "ride:42", "text": "on my way", "client_ref": 7 },
    })
    .to_string();

    // Bob is not in the room yet.
    handle_frame(&b, &bob, &text).await;
    assert!(is_error_notice(&next(&mut bob_rx).unwrap()));
    assert!(next(&mut alice_rx).is_none());

    b.hub().join_room(bob.id(), room.clone()).unwrap();
    let Dispatched::Chat(report) = dispatch(&b, &bob, &text).await.unwrap() else {
      panic!("expected chat");
    };
    assert_eq!(report.delivered, 2);

    let got = next(&mut alice_rx).unwrap();
    assert_eq!(got.subject_id.as_deref(), Some("D1"));
    assert_eq!(got.room_id.as_ref(), Some(&room));
    let Payload::ChatMessage(chat) = got.payload else { panic!("expected chat") };
    assert_eq!(chat.text, "on my way");
    assert_eq!(chat.extra.get("client_ref"), Some(&json!(7)));
  }

  #[tokio::test]
  async fn server_kinds_and_unknown_kinds_are_ignored() {
    let b = bridge().await;
    let (conn, mut rx) = connect(&b, "R1", Role::Rider);

    let status = frame("ride_status", json!({ "ride_id": "1", "status": "x" }));
    assert_eq!(dispatch(&b, &conn, &status).await.unwrap(), Dispatched::Ignored("ride_status".into()));

    let future = frame("surge_pricing", json!({ "multiplier": 2 }));
    handle_frame(&b, &conn, &future).await;
    assert!(next(&mut rx).is_none());
  }

  #[tokio::test]
  async fn malformed_frames_get_error_notice() {
    let b = bridge().await;
    let (conn, mut rx) = connect(&b, "R1", Role::Rider);

    handle_frame(&b, &conn, "not json").await;
    assert!(is_error_notice(&next(&mut rx).unwrap()));

    handle_frame(&b, &conn, &frame("join_room", json!({ "room": 3 }))).await;
    assert!(is_error_notice(&next(&mut rx).unwrap()));
  }
}
