//! One live client session as seen by the hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hail_core::Role;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// A serialised envelope, shared between every recipient of a fan-out.
pub type Frame = Arc<str>;

/// Why an enqueue did not happen. Internal to the hub; surfaced only in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
  #[error("outbound queue is full")]
  QueueOverflow,
  #[error("connection is closed")]
  Closed,
}

/// A connected client: identity, role, bounded outbound queue and liveness.
pub struct Connection {
  id:            ConnectionId,
  subject_id:    String,
  role:          Role,
  /// `None` once closed; dropping the sender ends the writer's queue.
  tx:            Mutex<Option<mpsc::Sender<Frame>>>,
  closed:        CancellationToken,
  connected_at:  Instant,
  last_activity: Mutex<Instant>,
  overflows:     AtomicU64,
}

impl Connection {
  /// Create a connection with an outbound queue of `capacity` frames. The
  /// receiver goes to the connection's writer loop.
  pub fn open(
    subject_id: impl Into<String>,
    role: Role,
    capacity: usize,
  ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let now = Instant::now();
    let conn = Self {
      id: Uuid::new_v4(),
      subject_id: subject_id.into(),
      role,
      tx: Mutex::new(Some(tx)),
      closed: CancellationToken::new(),
      connected_at: now,
      last_activity: Mutex::new(now),
      overflows: AtomicU64::new(0),
    };
    (Arc::new(conn), rx)
  }

  pub fn id(&self) -> ConnectionId { self.id }

  pub fn subject_id(&self) -> &str { &self.subject_id }

  pub fn role(&self) -> Role { self.role }

  /// Enqueue without waiting.
  pub fn try_send(&self, frame: Frame) -> Result<(), SendError> {
    let guard = self.tx.lock();
    let Some(tx) = guard.as_ref() else {
      return Err(SendError::Closed);
    };
    match tx.try_send(frame) {
      Ok(()) => Ok(()),
      Err(mpsc::error::TrySendError::Full(_)) => {
        self.overflows.fetch_add(1, Ordering::Relaxed);
        Err(SendError::QueueOverflow)
      }
      Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
    }
  }

  /// Close the outbound queue and signal the session to stop. Idempotent.
  pub fn close(&self) {
    self.tx.lock().take();
    self.closed.cancel();
  }

  pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }

  /// Resolves once [`Self::close`] has been called.
  pub fn closed(&self) -> WaitForCancellationFuture<'_> { self.closed.cancelled() }

  /// Record inbound activity (any frame, including pongs).
  pub fn mark_active(&self) { *self.last_activity.lock() = Instant::now(); }

  pub fn idle_for(&self) -> Duration { self.last_activity.lock().elapsed() }

  pub fn age(&self) -> Duration { self.connected_at.elapsed() }

  pub fn overflow_count(&self) -> u64 { self.overflows.load(Ordering::Relaxed) }
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("id", &self.id)
      .field("subject_id", &self.subject_id)
      .field("role", &self.role)
      .field("closed", &self.is_closed())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(s: &str) -> Frame { Arc::from(s) }

  #[tokio::test]
  async fn send_reaches_receiver() {
    let (conn, mut rx) = Connection::open("R1", Role::Rider, 4);
    conn.try_send(frame("hello")).unwrap();
    assert_eq!(&*rx.recv().await.unwrap(), "hello");
  }

  #[test]
  fn full_queue_reports_overflow() {
    let (conn, _rx) = Connection::open("R1", Role::Rider, 1);
    conn.try_send(frame("one")).unwrap();
    assert_eq!(conn.try_send(frame("two")), Err(SendError::QueueOverflow));
    assert_eq!(conn.overflow_count(), 1);
  }

  #[tokio::test]
  async fn close_ends_queue_and_rejects_sends() {
    let (conn, mut rx) = Connection::open("R1", Role::Rider, 4);
    conn.close();
    conn.close();
    assert!(conn.is_closed());
    assert_eq!(conn.try_send(frame("late")), Err(SendError::Closed));
    assert!(rx.recv().await.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn activity_resets_idle_time() {
    let (conn, _rx) = Connection::open("D1", Role::Driver, 4);
    tokio::time::advance(Duration::from_secs(40)).await;
    assert!(conn.idle_for() >= Duration::from_secs(40));
    conn.mark_active();
    assert!(conn.idle_for() < Duration::from_secs(1));
  }
}
