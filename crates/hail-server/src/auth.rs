//! Handshake tokens and the [`Identity`] extractor.
//!
//! A token is `hex(HMAC-SHA256(secret, subject_id ":" role))`. Token issuance
//! belongs to whatever service authenticates riders and drivers; the server
//! only checks that the query parameters were signed with the shared secret.

use axum::{
  extract::{FromRequestParts, Query},
  http::request::Parts,
};
use hail_core::{
  Role,
  cache::LocationCache,
  store::LocationStore,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::{AppState, error::Error};

type HmacSha256 = Hmac<Sha256>;

fn signer(secret: &str, subject_id: &str, role: Role) -> Result<HmacSha256, Error> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| Error::Unauthorized)?;
  mac.update(subject_id.as_bytes());
  mac.update(b":");
  mac.update(role.to_string().as_bytes());
  Ok(mac)
}

pub fn issue_token(secret: &str, subject_id: &str, role: Role) -> Result<String, Error> {
  Ok(hex::encode(signer(secret, subject_id, role)?.finalize().into_bytes()))
}

/// Constant-time check of a hex token.
pub fn verify_token(secret: &str, subject_id: &str, role: Role, token: &str) -> Result<(), Error> {
  let tag = hex::decode(token).map_err(|_| Error::Unauthorized)?;
  signer(secret, subject_id, role)?
    .verify_slice(&tag)
    .map_err(|_| Error::Unauthorized)
}

#[derive(Debug, Deserialize)]
struct Handshake {
  subject_id: String,
  role:       Role,
  #[serde(default)]
  token:      Option<String>,
}

/// The authenticated caller of a websocket handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub subject_id: String,
  pub role:       Role,
}

impl<S, C> FromRequestParts<AppState<S, C>> for Identity
where
  S: LocationStore + 'static,
  C: LocationCache + 'static,
{
  type Rejection = Error;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, C>,
  ) -> Result<Self, Self::Rejection> {
    let Query(handshake) = Query::<Handshake>::try_from_uri(&parts.uri)
      .map_err(|e| Error::BadRequest(e.body_text()))?;

    let subject_id = handshake.subject_id.trim();
    if subject_id.is_empty() {
      return Err(Error::BadRequest("subject_id must not be empty".into()));
    }
    let token = handshake.token.ok_or(Error::Unauthorized)?;
    verify_token(&state.config.token_secret, subject_id, handshake.role, &token)?;

    Ok(Identity { subject_id: subject_id.to_owned(), role: handshake.role })
  }
}
