//! Error taxonomy shared by the tracker and the server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Latitude or longitude out of range; rejected before any write.
  #[error("invalid coordinate: lat={lat}, lng={lng}")]
  InvalidCoordinate { lat: f64, lng: f64 },

  #[error("invalid radius: {0} km")]
  InvalidRadius(f64),

  #[error("no location on record for subject {0}")]
  NotFound(String),

  /// The persistent store failed or timed out. Callers retry with backoff.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("unauthorized: {0}")]
  Unauthorized(String),
}

impl Error {
  pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::StorageUnavailable(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
