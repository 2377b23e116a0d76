//! The hub: connection registry, room index and fan-out.
//!
//! All registry state lives behind one `RwLock`. Membership changes take the
//! write lock; publishing takes the read lock only long enough to snapshot
//! recipients, then enqueues outside it with `try_send`. A full queue evicts
//! that one connection and never delays the others.

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use hail_core::{
  Role, RoomId,
  envelope::{Envelope, Payload, Welcome},
};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
  connection::{Connection, ConnectionId, Frame, SendError},
  error::HubError,
  keepalive::KeepaliveConfig,
  room::RoomRegistry,
};

// ─── Configuration ────────────────────────────────────────────────────────────

/// What happens to a subject's existing connections when it connects again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
  /// Connections coexist; every one receives the subject's traffic.
  #[default]
  Keep,
  /// Older connections of the same subject are unregistered.
  Evict,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HubConfig {
  pub queue_capacity:   usize,
  pub reconnect_policy: ReconnectPolicy,
  pub keepalive:        KeepaliveConfig,
}

impl Default for HubConfig {
  fn default() -> Self {
    Self {
      queue_capacity:   256,
      reconnect_policy: ReconnectPolicy::Keep,
      keepalive:        KeepaliveConfig::default(),
    }
  }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
  /// Connections selected by the envelope's target.
  pub recipients: usize,
  pub delivered:  usize,
  /// Connections unregistered because their queue was full.
  pub evicted:    usize,
}

// ─── State ────────────────────────────────────────────────────────────────────

struct Member {
  conn:  Arc<Connection>,
  rooms: HashSet<RoomId>,
}

struct HubState {
  running:     bool,
  connections: HashMap<ConnectionId, Member>,
  rooms:       RoomRegistry,
}

impl HubState {
  fn remove(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
    let member = self.connections.remove(&id)?;
    for room in &member.rooms {
      self.rooms.leave(room, id);
    }
    Some(member.conn)
  }

  fn join(&mut self, id: ConnectionId, room: RoomId) -> Result<bool, HubError> {
    let member = self.connections.get_mut(&id).ok_or(HubError::UnknownConnection(id))?;
    if !member.rooms.insert(room.clone()) {
      return Ok(false);
    }
    self.rooms.join(room, id);
    Ok(true)
  }
}

struct Inner {
  state:  RwLock<HubState>,
  config: HubConfig,
}

/// Handle to a running hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
  inner: Arc<Inner>,
}

impl Hub {
  pub fn start(config: HubConfig) -> Self {
    info!(
      queue_capacity = config.queue_capacity,
      reconnect_policy = ?config.reconnect_policy,
      "hub started"
    );
    let state = HubState {
      running:     true,
      connections: HashMap::new(),
      rooms:       RoomRegistry::default(),
    };
    Self { inner: Arc::new(Inner { state: RwLock::new(state), config }) }
  }

  pub fn config(&self) -> &HubConfig { &self.inner.config }

  pub fn is_running(&self) -> bool { self.inner.state.read().running }

  /// Create a connection sized to this hub's queue capacity.
  pub fn open_connection(
    &self,
    subject_id: impl Into<String>,
    role: Role,
  ) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
    Connection::open(subject_id, role, self.inner.config.queue_capacity)
  }

  // ─── Membership ─────────────────────────────────────────────────────────

  /// Add a connection, auto-join its user room and role room, and enqueue a
  /// `welcome` to it alone.
  pub fn register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
    let id = conn.id();
    let subject_id = conn.subject_id().to_owned();
    let role = conn.role();

    let (evicted, rooms) = {
      let mut state = self.inner.state.write();
      if !state.running {
        return Err(HubError::ShuttingDown);
      }
      if state.connections.contains_key(&id) {
        return Err(HubError::AlreadyRegistered(id));
      }

      let mut evicted = Vec::new();
      if self.inner.config.reconnect_policy == ReconnectPolicy::Evict {
        let previous: Vec<ConnectionId> = state
          .connections
          .iter()
          .filter(|(_, m)| m.conn.subject_id() == subject_id)
          .map(|(id, _)| *id)
          .collect();
        evicted.extend(previous.into_iter().filter_map(|old| state.remove(old)));
      }

      state.connections.insert(id, Member { conn: conn.clone(), rooms: HashSet::new() });
      let mut rooms = vec![RoomId::user(&subject_id)];
      if role.has_role_room() {
        rooms.push(RoomId::role(role));
      }
      for room in &rooms {
        state.join(id, room.clone())?;
      }

      // Enqueued under the lock so nothing published to the new rooms can
      // overtake it.
      let welcome = Envelope::new(Payload::Welcome(Welcome {
        connection_id: id.to_string(),
        subject_id:    subject_id.clone(),
        role,
        rooms:         rooms.clone(),
      }));
      if let Some(frame) = encode(&welcome) {
        if let Err(e) = conn.try_send(frame) {
          warn!(connection_id = %id, error = %e, "welcome not delivered");
        }
      }
      (evicted, rooms)
    };

    for old in evicted {
      info!(connection_id = %old.id(), subject_id = %subject_id, "evicted by reconnect");
      old.close();
    }
    info!(
      connection_id = %id,
      subject_id = %subject_id,
      role = %role,
      rooms = rooms.len(),
      "connection registered"
    );
    Ok(())
  }

  /// Remove a connection from the registry and every room it belonged to,
  /// then close it. Returns `false` if it was not registered.
  pub fn unregister(&self, id: ConnectionId) -> bool {
    let removed = self.inner.state.write().remove(id);
    match removed {
      Some(conn) => {
        conn.close();
        info!(connection_id = %id, subject_id = conn.subject_id(), "connection unregistered");
        true
      }
      None => false,
    }
  }

  /// Returns `true` if the connection was not already a member.
  pub fn join_room(&self, id: ConnectionId, room: RoomId) -> Result<bool, HubError> {
    let joined = self.inner.state.write().join(id, room.clone())?;
    if joined {
      debug!(connection_id = %id, room = %room, "joined room");
    }
    Ok(joined)
  }

  /// Returns `true` if the connection was a member.
  pub fn leave_room(&self, id: ConnectionId, room: &RoomId) -> Result<bool, HubError> {
    let mut state = self.inner.state.write();
    let member = state.connections.get_mut(&id).ok_or(HubError::UnknownConnection(id))?;
    if !member.rooms.remove(room) {
      return Ok(false);
    }
    state.rooms.leave(room, id);
    drop(state);
    debug!(connection_id = %id, room = %room, "left room");
    Ok(true)
  }

  // ─── Fan-out ────────────────────────────────────────────────────────────

  /// Deliver to the envelope's `room_id`, or to every connection when it has
  /// none. Never blocks on a slow consumer.
  pub fn publish(&self, envelope: &Envelope) -> PublishReport {
    let Some(frame) = encode(envelope) else {
      return PublishReport::default();
    };

    let recipients: Vec<Arc<Connection>> = {
      let state = self.inner.state.read();
      match &envelope.room_id {
        Some(room) => state
          .rooms
          .members(room)
          .map(|ids| {
            ids
              .iter()
              .filter_map(|id| state.connections.get(id))
              .map(|m| m.conn.clone())
              .collect()
          })
          .unwrap_or_default(),
        None => state.connections.values().map(|m| m.conn.clone()).collect(),
      }
    };

    self.deliver(recipients, frame, envelope.kind())
  }

  pub fn publish_to_room(&self, room: RoomId, envelope: Envelope) -> PublishReport {
    self.publish(&envelope.to_room(room))
  }

  /// Deliver to every connection of one subject through its user room.
  pub fn publish_to_user(&self, subject_id: &str, envelope: Envelope) -> PublishReport {
    self.publish_to_room(RoomId::user(subject_id), envelope)
  }

  /// Enqueue to a single connection regardless of rooms. Used for replies
  /// such as error notices.
  pub fn send_to(&self, id: ConnectionId, envelope: &Envelope) -> Result<bool, HubError> {
    let conn = self
      .inner
      .state
      .read()
      .connections
      .get(&id)
      .map(|m| m.conn.clone())
      .ok_or(HubError::UnknownConnection(id))?;
    let Some(frame) = encode(envelope) else {
      return Ok(false);
    };
    Ok(self.deliver(vec![conn], frame, envelope.kind()).delivered == 1)
  }

  fn deliver(&self, recipients: Vec<Arc<Connection>>, frame: Frame, kind: &str) -> PublishReport {
    let mut report = PublishReport { recipients: recipients.len(), ..Default::default() };
    let mut overflowed = Vec::new();

    for conn in recipients {
      match conn.try_send(frame.clone()) {
        Ok(()) => report.delivered += 1,
        Err(SendError::QueueOverflow) => {
          warn!(
            connection_id = %conn.id(),
            subject_id = conn.subject_id(),
            kind,
            "outbound queue full, evicting slow consumer"
          );
          overflowed.push(conn.id());
        }
        Err(SendError::Closed) => {}
      }
    }

    for id in overflowed {
      if self.unregister(id) {
        report.evicted += 1;
      }
    }
    report
  }

  // ─── Lifecycle ──────────────────────────────────────────────────────────

  /// Stop accepting registrations, close every connection and clear all
  /// rooms. Idempotent.
  pub fn shutdown(&self) {
    let drained: Vec<Arc<Connection>> = {
      let mut state = self.inner.state.write();
      if !state.running {
        return;
      }
      state.running = false;
      state.rooms.clear();
      state.connections.drain().map(|(_, m)| m.conn).collect()
    };
    for conn in &drained {
      conn.close();
    }
    info!(closed = drained.len(), "hub stopped");
  }

  // ─── Introspection ──────────────────────────────────────────────────────

  pub fn connection_count(&self) -> usize { self.inner.state.read().connections.len() }

  pub fn room_count(&self) -> usize { self.inner.state.read().rooms.len() }

  pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
    self.inner.state.read().connections.get(&id).map(|m| m.conn.clone())
  }

  /// Connection ids in a room; empty if the room does not exist.
  pub fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
    self
      .inner
      .state
      .read()
      .rooms
      .members(room)
      .map(|ids| ids.iter().copied().collect())
      .unwrap_or_default()
  }

  pub fn rooms_of(&self, id: ConnectionId) -> Vec<RoomId> {
    let state = self.inner.state.read();
    let mut rooms: Vec<RoomId> = state
      .connections
      .get(&id)
      .map(|m| m.rooms.iter().cloned().collect())
      .unwrap_or_default();
    rooms.sort();
    rooms
  }

  /// Union of rooms across every connection of one subject.
  pub fn subject_rooms(&self, subject_id: &str) -> Vec<RoomId> {
    let state = self.inner.state.read();
    let mut rooms: Vec<RoomId> = state
      .connections
      .values()
      .filter(|m| m.conn.subject_id() == subject_id)
      .flat_map(|m| m.rooms.iter().cloned())
      .collect::<HashSet<_>>()
      .into_iter()
      .collect();
    rooms.sort();
    rooms
  }

  /// Registry and room index agree, and no room is empty.
  #[cfg(test)]
  pub(crate) fn assert_consistent(&self) {
    let state = self.inner.state.read();
    for (room, ids) in state.rooms.iter() {
      assert!(!ids.is_empty(), "empty room {room} retained");
      for id in ids {
        let member = state.connections.get(id).expect("room member is registered");
        assert!(member.rooms.contains(room));
      }
    }
    for (id, member) in &state.connections {
      for room in &member.rooms {
        assert!(state.rooms.members(room).is_some_and(|ids| ids.contains(id)));
      }
    }
  }
}

fn encode(envelope: &Envelope) -> Option<Frame> {
  match serde_json::to_string(envelope) {
    Ok(json) => Some(Arc::from(json)),
    Err(e) => {
      warn!(kind = envelope.kind(), error = %e, "failed to encode envelope");
      None
    }
  }
}
