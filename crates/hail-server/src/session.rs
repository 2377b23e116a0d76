//! WebSocket session lifecycle: handshake, registration, read loop, cleanup.

use std::sync::Arc;

use axum::{
  extract::{
    State,
    ws::{Message, WebSocket, WebSocketUpgrade},
  },
  response::{IntoResponse, Response},
};
use futures::{
  SinkExt, StreamExt,
  stream::{SplitSink, SplitStream},
};
use hail_core::{cache::LocationCache, store::LocationStore};
use hail_hub::{Connection, Frame, HubError, OutboundTransport, drive_outbound};
use tracing::{debug, info, instrument, warn};

use crate::{AppState, auth::Identity, bridge::PresenceBridge, dispatch, error::Error};

/// The axum websocket sink as an [`OutboundTransport`].
pub struct WsTransport {
  sink: SplitSink<WebSocket, Message>,
}

impl OutboundTransport for WsTransport {
  type Error = axum::Error;

  async fn send_text(&mut self, frame: Frame) -> Result<(), axum::Error> {
    self.sink.send(Message::Text(frame.as_ref().into())).await
  }

  async fn send_ping(&mut self) -> Result<(), axum::Error> {
    self.sink.send(Message::Ping(Vec::new().into())).await
  }

  async fn close(&mut self) -> Result<(), axum::Error> { self.sink.close().await }
}

/// `GET /ws?subject_id=&role=&token=`. The token is checked before upgrading.
pub async fn ws_handler<S, C>(
  State(state): State<AppState<S, C>>,
  identity: Identity,
  ws: WebSocketUpgrade,
) -> Response
where
  S: LocationStore + 'static,
  C: LocationCache + 'static,
{
  if !state.bridge.hub().is_running() {
    return Error::Hub(HubError::ShuttingDown).into_response();
  }
  ws.on_upgrade(move |socket| run_session(socket, identity, state.bridge))
}

#[instrument(skip_all, fields(subject_id = %identity.subject_id, role = %identity.role))]
pub async fn run_session<S, C>(socket: WebSocket, identity: Identity, bridge: PresenceBridge<S, C>)
where
  S: LocationStore + 'static,
  C: LocationCache + 'static,
{
  let hub = bridge.hub().clone();
  let (sink, stream) = socket.split();
  let (conn, queue) = hub.open_connection(identity.subject_id.as_str(), identity.role);

  if let Err(e) = hub.register(conn.clone()) {
    warn!(error = %e, "registration refused");
    return;
  }

  let keepalive = hub.config().keepalive;
  let writer_conn = conn.clone();
  let writer = tokio::spawn(async move {
    let mut transport = WsTransport { sink };
    drive_outbound(writer_conn, queue, &mut transport, keepalive).await
  });

  read_loop(&bridge, &conn, stream).await;

  hub.unregister(conn.id());
  match writer.await {
    Ok(exit) => info!(connection_id = %conn.id(), ?exit, "session ended"),
    Err(e) => warn!(connection_id = %conn.id(), error = %e, "writer task failed"),
  }
}

async fn read_loop<S, C>(
  bridge: &PresenceBridge<S, C>,
  conn: &Arc<Connection>,
  mut stream: SplitStream<WebSocket>,
) where
  S: LocationStore,
  C: LocationCache,
{
  loop {
    let next = tokio::select! {
      () = conn.closed() => break,
      next = stream.next() => next,
    };
    let msg = match next {
      Some(Ok(msg)) => msg,
      Some(Err(e)) => {
        debug!(connection_id = %conn.id(), error = %e, "websocket read failed");
        break;
      }
      None => break,
    };

    conn.mark_active();
    match msg {
      Message::Text(text) => dispatch::handle_frame(bridge, conn, text.as_str()).await,
      Message::Binary(data) => match std::str::from_utf8(&data) {
        Ok(text) => dispatch::handle_frame(bridge, conn, text).await,
        Err(_) => debug!(connection_id = %conn.id(), len = data.len(), "non-UTF8 binary frame dropped"),
      },
      Message::Close(_) => {
        debug!(connection_id = %conn.id(), "client sent close frame");
        break;
      }
      Message::Ping(_) | Message::Pong(_) => {}
    }
  }
}
