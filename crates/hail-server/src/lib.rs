//! Websocket front end for the hail presence and broadcast core.
//!
//! Exposes an axum [`Router`] with the `/ws` handshake and a `/healthz`
//! health check, backed by a [`PresenceBridge`] over any [`LocationStore`] and
//! [`LocationCache`].

pub mod auth;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;

pub use bridge::PresenceBridge;
pub use config::ServerConfig;
pub use error::Error;

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::get,
};
use hail_core::{cache::LocationCache, store::LocationStore};
use serde_json::json;
use tower_http::trace::TraceLayer;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, C> {
  pub bridge: PresenceBridge<S, C>,
  pub config: Arc<ServerConfig>,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self { Self { bridge: self.bridge.clone(), config: self.config.clone() } }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router<S, C>(state: AppState<S, C>) -> Router
where
  S: LocationStore + 'static,
  C: LocationCache + 'static,
{
  Router::new()
    .route("/ws",      get(session::ws_handler::<S, C>))
    .route("/healthz", get(healthz::<S, C>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn healthz<S, C>(State(state): State<AppState<S, C>>) -> Response
where
  S: LocationStore + 'static,
  C: LocationCache + 'static,
{
  let hub = state.bridge.hub();
  let status = if hub.is_running() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
  let body = json!({
    "status":      if hub.is_running() { "ok" } else { "stopping" },
    "connections": hub.connection_count(),
    "rooms":       hub.room_count(),
  });
  (status, Json(body)).into_response()
}
