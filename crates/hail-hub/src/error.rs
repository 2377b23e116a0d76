//! Error type for `hail-hub`.

use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum HubError {
  #[error("connection {0} is not registered")]
  UnknownConnection(ConnectionId),

  #[error("connection {0} is already registered")]
  AlreadyRegistered(ConnectionId),

  #[error("hub is shutting down")]
  ShuttingDown,

  #[error("invalid keepalive settings: {0}")]
  InvalidKeepalive(String),
}
