//! The envelope — the typed unit of communication between clients and the hub.
//!
//! On the wire an envelope is `{"type": ..., "data": ..., "room_id"?, "subject_id"?, "timestamp"}`.
//! Known kinds decode into strongly-typed payloads; any other `type` string is
//! preserved verbatim as [`Payload::Unknown`] so newer producers and clients
//! keep working against an older hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::Error as _};
use serde_json::{Map, Value};

use crate::{role::Role, room::RoomId};

// ─── Payloads ─────────────────────────────────────────────────────────────────

/// Sent to a connection, and only that connection, right after it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
  pub connection_id: String,
  pub subject_id:    String,
  pub role:          Role,
  pub rooms:         Vec<RoomId>,
}

/// `join_room` / `leave_room` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRef {
  pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
  pub lat:         f64,
  pub lng:         f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ride_id:     Option<String>,
  /// Set on outbound updates; ignored on inbound ones.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub room_id: RoomId,
  pub text:    String,
  /// Client-defined fields (attachments, client message ids, ...).
  #[serde(flatten)]
  pub extra:   Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStatus {
  pub ride_id: String,
  pub status:  String,
  #[serde(flatten)]
  pub extra:   Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
  #[default]
  Info,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  pub body:  String,
  #[serde(default)]
  pub level: NotificationLevel,
}

/// The typed payload of an envelope. The variant name is the wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
  Welcome(Welcome),
  JoinRoom(RoomRef),
  LeaveRoom(RoomRef),
  LocationUpdate(LocationUpdate),
  ChatMessage(ChatMessage),
  RideStatus(RideStatus),
  Notification(Notification),

  /// Any `type` this build does not know. Serialised by hand in
  /// [`Payload::to_json`]; never through the derived impl.
  #[serde(skip)]
  Unknown { kind: String, data: Value },
}

const KNOWN_KINDS: &[&str] = &[
  "welcome",
  "join_room",
  "leave_room",
  "location_update",
  "chat_message",
  "ride_status",
  "notification",
];

impl Payload {
  /// The wire `type` string.
  pub fn kind(&self) -> &str {
    match self {
      Self::Welcome(_) => "welcome",
      Self::JoinRoom(_) => "join_room",
      Self::LeaveRoom(_) => "leave_room",
      Self::LocationUpdate(_) => "location_update",
      Self::ChatMessage(_) => "chat_message",
      Self::RideStatus(_) => "ride_status",
      Self::Notification(_) => "notification",
      Self::Unknown { kind, .. } => kind,
    }
  }

  /// The inner payload without the type tag.
  pub fn to_json(&self) -> serde_json::Result<Value> {
    if let Self::Unknown { data, .. } = self {
      return Ok(data.clone());
    }
    let full = serde_json::to_value(self)?;
    Ok(full.get("data").cloned().unwrap_or(Value::Null))
  }

  /// Rebuild a payload from its wire `type` and `data`.
  ///
  /// Known kinds with a malformed payload are an error; unknown kinds are
  /// kept opaque.
  pub fn from_parts(kind: &str, data: Value) -> serde_json::Result<Self> {
    if !KNOWN_KINDS.contains(&kind) {
      return Ok(Self::Unknown { kind: kind.to_owned(), data });
    }
    let wrapped = serde_json::json!({ "type": kind, "data": data });
    serde_json::from_value(wrapped)
  }
}

// ─── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Envelope {
  pub payload:    Payload,
  /// Target room for outbound envelopes. `None` means every connection.
  pub room_id:    Option<RoomId>,
  /// Originating subject, if any.
  pub subject_id: Option<String>,
  pub timestamp:  DateTime<Utc>,
}

impl Envelope {
  pub fn new(payload: Payload) -> Self {
    Self { payload, room_id: None, subject_id: None, timestamp: Utc::now() }
  }

  pub fn to_room(mut self, room: RoomId) -> Self {
    self.room_id = Some(room);
    self
  }

  pub fn from_subject(mut self, subject_id: impl Into<String>) -> Self {
    self.subject_id = Some(subject_id.into());
    self
  }

  pub fn kind(&self) -> &str { self.payload.kind() }

  /// Convenience for a notification addressed to one client.
  pub fn notice(level: NotificationLevel, body: impl Into<String>) -> Self {
    Self::new(Payload::Notification(Notification {
      title: None,
      body: body.into(),
      level,
    }))
  }
}

/// Wire representation used on the decode path.
#[derive(Deserialize)]
struct RawEnvelope {
  #[serde(rename = "type")]
  kind:       String,
  #[serde(default)]
  data:       Value,
  #[serde(default)]
  room_id:    Option<RoomId>,
  #[serde(default)]
  subject_id: Option<String>,
  /// Inbound frames may omit it; the hub stamps receipt time.
  #[serde(default)]
  timestamp:  Option<DateTime<Utc>>,
}

impl TryFrom<RawEnvelope> for Envelope {
  type Error = serde_json::Error;

  fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
    Ok(Self {
      payload:    Payload::from_parts(&raw.kind, raw.data)?,
      room_id:    raw.room_id,
      subject_id: raw.subject_id,
      timestamp:  raw.timestamp.unwrap_or_else(Utc::now),
    })
  }
}

#[derive(Serialize)]
struct RawEnvelopeRef<'a> {
  #[serde(rename = "type")]
  kind:       &'a str,
  data:       Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  room_id:    Option<&'a RoomId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  subject_id: Option<&'a str>,
  timestamp:  DateTime<Utc>,
}

impl Serialize for Envelope {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let data = self.payload.to_json().map_err(S::Error::custom)?;
    RawEnvelopeRef {
      kind: self.payload.kind(),
      data,
      room_id: self.room_id.as_ref(),
      subject_id: self.subject_id.as_deref(),
      timestamp: self.timestamp,
    }
    .serialize(serializer)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn decodes_inbound_join_without_timestamp() {
    let env: Envelope =
      serde_json::from_str(r#"{"type":"join_room","data":{"room_id":"ride:42"}}"#).unwrap();
    assert_eq!(
      env.payload,
      Payload::JoinRoom(RoomRef { room_id: RoomId::ride("42") })
    );
    assert!(env.room_id.is_none());
  }

  #[test]
  fn known_kind_with_bad_payload_is_an_error() {
    let res = serde_json::from_str::<Envelope>(r#"{"type":"location_update","data":{"lat":"x"}}"#);
    assert!(res.is_err());
  }

  #[test]
  fn unknown_kind_is_preserved() {
    let env: Envelope =
      serde_json::from_str(r#"{"type":"call_status","data":{"state":"ringing"}}"#).unwrap();
    assert_eq!(env.kind(), "call_status");

    let out = serde_json::to_value(&env).unwrap();
    assert_eq!(out["type"], "call_status");
    assert_eq!(out["data"]["state"], "ringing");
  }

  #[test]
  fn chat_extras_survive_reencoding() {
    let env: Envelope = serde_json::from_value(json!({
      "type": "chat_message",
      "data": {"room_id": "ride:1", "text": "on my way", "client_msg_id": "m-9"},
    }))
    .unwrap();
    let Payload::ChatMessage(chat) = &env.payload else { panic!("not chat") };
    assert_eq!(chat.extra["client_msg_id"], "m-9");

    let out = serde_json::to_value(&env).unwrap();
    assert_eq!(out["data"]["client_msg_id"], "m-9");
    assert_eq!(out["data"]["text"], "on my way");
  }

  #[test]
  fn outbound_shape_carries_room_and_subject() {
    let env = Envelope::new(Payload::RideStatus(RideStatus {
      ride_id: "42".into(),
      status:  "accepted".into(),
      extra:   Map::new(),
    }))
    .to_room(RoomId::ride("42"))
    .from_subject("D1");

    let out = serde_json::to_value(&env).unwrap();
    assert_eq!(out["type"], "ride_status");
    assert_eq!(out["data"]["status"], "accepted");
    assert_eq!(out["room_id"], "ride:42");
    assert_eq!(out["subject_id"], "D1");
    assert!(out["timestamp"].is_string());

    let back: Envelope = serde_json::from_value(out).unwrap();
    assert_eq!(back, env);
  }

  #[test]
  fn notification_level_defaults_to_info() {
    let env: Envelope =
      serde_json::from_str(r#"{"type":"notification","data":{"body":"hi"}}"#).unwrap();
    let Payload::Notification(n) = env.payload else { panic!("not a notification") };
    assert_eq!(n.level, NotificationLevel::Info);
  }
}
