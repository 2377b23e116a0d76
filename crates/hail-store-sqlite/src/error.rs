//! Error type for `hail-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("timestamp out of range: {0}")]
  Timestamp(i64),

  #[error("unknown role in store: {0:?}")]
  Role(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
