//! The connection hub: live connections, rooms, fan-out and keepalive.
//!
//! A [`Hub`] is an owned service handle with an explicit
//! [`Hub::start`] / [`Hub::shutdown`] lifecycle. Clone it into whatever needs
//! to publish; there is no process-wide instance.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
#![allow(async_fn_in_trait)]

pub mod connection;
pub mod error;
pub mod hub;
pub mod keepalive;
pub mod room;

pub use connection::{Connection, ConnectionId, Frame, SendError};
pub use error::HubError;
pub use hub::{Hub, HubConfig, PublishReport, ReconnectPolicy};
pub use keepalive::{KeepaliveConfig, OutboundTransport, WriterExit, drive_outbound};
