//! Room identifiers and the naming convention used for fan-out.
//!
//! | prefix | meaning |
//! |--------|---------|
//! | `user:<subject>` | personal room, one per subject |
//! | `role:<role>` | every connection of a role |
//! | `ride:<ride>` | participants of a ride |
//! | `topic:<name>` | free-form topic |
//!
//! Any other non-empty string is accepted as a free-form room.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::role::Role;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
  User,
  Role,
  Ride,
  Topic,
  Other,
}

impl RoomId {
  /// Wrap a raw room name. Returns `None` for an empty or blank name.
  pub fn parse(raw: impl Into<String>) -> Option<Self> {
    let raw = raw.into();
    if raw.trim().is_empty() { None } else { Some(Self(raw)) }
  }

  pub fn user(subject_id: &str) -> Self { Self(format!("user:{subject_id}")) }

  pub fn role(role: Role) -> Self { Self(format!("role:{role}")) }

  pub fn ride(ride_id: &str) -> Self { Self(format!("ride:{ride_id}")) }

  pub fn topic(name: &str) -> Self { Self(format!("topic:{name}")) }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn kind(&self) -> RoomKind {
    match self.0.split_once(':').map(|(prefix, _)| prefix) {
      Some("user") => RoomKind::User,
      Some("role") => RoomKind::Role,
      Some("ride") => RoomKind::Ride,
      Some("topic") => RoomKind::Topic,
      _ => RoomKind::Other,
    }
  }
}

impl TryFrom<String> for RoomId {
  type Error = &'static str;

  fn try_from(raw: String) -> Result<Self, Self::Error> {
    Self::parse(raw).ok_or("room id must not be blank")
  }
}

impl From<RoomId> for String {
  fn from(room: RoomId) -> Self { room.0 }
}

impl fmt::Display for RoomId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constructors_follow_naming_convention() {
    assert_eq!(RoomId::user("D1").as_str(), "user:D1");
    assert_eq!(RoomId::role(Role::Driver).as_str(), "role:driver");
    assert_eq!(RoomId::ride("42").kind(), RoomKind::Ride);
    assert_eq!(RoomId::topic("active_rides").kind(), RoomKind::Topic);
    assert_eq!(RoomId::parse("ride_42").unwrap().kind(), RoomKind::Other);
  }

  #[test]
  fn blank_names_are_rejected() {
    assert!(RoomId::parse("").is_none());
    assert!(RoomId::parse("   ").is_none());
    assert!(serde_json::from_str::<RoomId>("\"\"").is_err());
    let room: RoomId = serde_json::from_str("\"ride:7\"").unwrap();
    assert_eq!(room, RoomId::ride("7"));
  }
}
