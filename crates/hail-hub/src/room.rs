//! Room membership index.
//!
//! Rooms are created on first join and removed as soon as their last member
//! leaves, so a room present in the registry always has at least one member.

use std::collections::{HashMap, HashSet};

use hail_core::RoomId;

use crate::connection::ConnectionId;

#[derive(Debug, Default)]
pub struct RoomRegistry {
  rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomRegistry {
  /// Returns `true` if the connection was not already a member.
  pub fn join(&mut self, room: RoomId, conn: ConnectionId) -> bool {
    self.rooms.entry(room).or_default().insert(conn)
  }

  /// Returns `true` if the connection was a member.
  pub fn leave(&mut self, room: &RoomId, conn: ConnectionId) -> bool {
    let Some(members) = self.rooms.get_mut(room) else {
      return false;
    };
    let removed = members.remove(&conn);
    if members.is_empty() {
      self.rooms.remove(room);
    }
    removed
  }

  pub fn members(&self, room: &RoomId) -> Option<&HashSet<ConnectionId>> {
    self.rooms.get(room)
  }

  pub fn contains(&self, room: &RoomId) -> bool { self.rooms.contains_key(room) }

  pub fn len(&self) -> usize { self.rooms.len() }

  pub fn is_empty(&self) -> bool { self.rooms.is_empty() }

  pub fn clear(&mut self) { self.rooms.clear(); }

  /// Every room currently held, for invariant checks.
  pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &HashSet<ConnectionId>)> {
    self.rooms.iter()
  }
}
