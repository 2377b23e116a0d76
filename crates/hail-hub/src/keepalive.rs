//! Per-connection writer loop with ping-based liveness.
//!
//! [`drive_outbound`] owns the sending half of one client transport. It
//! drains the connection's outbound queue in order, pings on a fixed
//! interval, and closes the connection once no inbound activity has been
//! seen for `ping_interval * timeout_multiplier`.

use std::{future::Future, sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
  connection::{Connection, Frame},
  error::HubError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
  #[serde(with = "secs")]
  pub ping_interval:      Duration,
  /// Missed intervals tolerated before the connection is considered dead.
  pub timeout_multiplier: u32,
}

impl Default for KeepaliveConfig {
  fn default() -> Self {
    Self { ping_interval: Duration::from_secs(30), timeout_multiplier: 2 }
  }
}

impl KeepaliveConfig {
  pub fn new(ping_interval: Duration, timeout_multiplier: u32) -> Result<Self, HubError> {
    let config = Self { ping_interval, timeout_multiplier };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), HubError> {
    if self.ping_interval.is_zero() {
      return Err(HubError::InvalidKeepalive("ping interval must be positive".into()));
    }
    if self.timeout_multiplier < 2 {
      return Err(HubError::InvalidKeepalive(format!(
        "timeout multiplier must be at least 2, got {}",
        self.timeout_multiplier
      )));
    }
    Ok(())
  }

  pub fn timeout(&self) -> Duration { self.ping_interval * self.timeout_multiplier }
}

mod secs {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
  }
}

/// The sending half of a client transport.
pub trait OutboundTransport: Send {
  type Error: std::fmt::Display + Send;

  fn send_text(&mut self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;

  fn send_ping(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

  fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Why a writer loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
  /// Every sender of the outbound queue is gone.
  QueueClosed,
  /// The connection was closed by the hub or the session.
  Closed,
  /// No inbound activity within the keepalive timeout.
  TimedOut,
  /// The transport refused a write.
  TransportError(String),
}

pub async fn drive_outbound<T: OutboundTransport>(
  conn: Arc<Connection>,
  mut queue: mpsc::Receiver<Frame>,
  transport: &mut T,
  keepalive: KeepaliveConfig,
) -> WriterExit {
  let timeout = keepalive.timeout();
  let mut ticker = tokio::time::interval(keepalive.ping_interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  // The first tick completes immediately.
  ticker.tick().await;

  let exit = loop {
    tokio::select! {
      biased;

      () = conn.closed() => break WriterExit::Closed,

      // Ahead of the queue so a backlog cannot starve the timeout.
      _ = ticker.tick() => {
        let idle = conn.idle_for();
        if idle >= timeout {
          warn!(
            connection_id = %conn.id(),
            subject_id = conn.subject_id(),
            idle_ms = idle.as_millis() as u64,
            "keepalive timeout, closing connection"
          );
          break WriterExit::TimedOut;
        }
        if let Err(e) = transport.send_ping().await {
          break WriterExit::TransportError(e.to_string());
        }
      }

      frame = queue.recv() => match frame {
        Some(frame) => {
          if let Err(e) = transport.send_text(frame).await {
            break WriterExit::TransportError(e.to_string());
          }
        }
        None => break WriterExit::QueueClosed,
      },
    }
  };

  conn.close();
  if let Err(e) = transport.close().await {
    debug!(connection_id = %conn.id(), error = %e, "transport close failed");
  }
  debug!(connection_id = %conn.id(), ?exit, "writer stopped");
  exit
}
