//! Core types and trait definitions for the hail presence and broadcast core.
//!
//! This crate is deliberately free of transport and database dependencies.
//! The store, tracker, hub and server crates all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod geo;
pub mod location;
pub mod role;
pub mod room;
pub mod store;

pub use error::{Error, Result};
pub use role::Role;
pub use room::RoomId;
