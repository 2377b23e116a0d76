//! SQLite backend for the hail location store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The single writer connection also
//! serialises concurrent writes for the same subject; the keyed upsert makes
//! each of them atomic.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteLocationStore;
