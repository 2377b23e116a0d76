//! Error types and axum `IntoResponse` implementation.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use hail_hub::HubError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error(transparent)]
  Core(#[from] hail_core::Error),
  #[error(transparent)]
  Hub(#[from] HubError),
}

impl Error {
  /// Whether this is the server's fault rather than the client's.
  pub fn is_internal(&self) -> bool {
    matches!(
      self,
      Error::Core(hail_core::Error::StorageUnavailable(_)) | Error::Hub(_)
    )
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match &self {
      Error::Unauthorized => StatusCode::UNAUTHORIZED,
      Error::BadRequest(_) => StatusCode::BAD_REQUEST,
      Error::Core(e) => match e {
        hail_core::Error::InvalidCoordinate { .. } | hail_core::Error::InvalidRadius(_) => {
          StatusCode::BAD_REQUEST
        }
        hail_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
        hail_core::Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        hail_core::Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      },
      Error::Hub(HubError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
      Error::Hub(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, self.to_string()).into_response()
  }
}
