//! WebSocket upgrade handler for client connections.

use axum::{
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    http::{HeaderMap, header::ORIGIN},
    response::Response,
};
use futures::StreamExt;
use log::{debug, info, warn};
use std::time::Duration;

use crate::api::{ApiError, AppState};
use crate::auth::{AuthError, CurrentUser};
use crate::identity::Identity;

use super::connection::{Connection, read_until_closed, run_writer};

/// How long the writer gets to flush its close frame once the reader is done.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler.
///
/// GET /api/ws
pub async fn ws_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if let Some(origin) = headers.get(ORIGIN).and_then(|h| h.to_str().ok())
        && !state.auth.is_origin_allowed(origin)
    {
        warn!("Rejecting WebSocket upgrade from origin {}", origin);
        return Err(AuthError::OriginNotAllowed(origin.to_string()).into());
    }

    let identity = user.identity();
    info!("WebSocket upgrade request from user {}", identity);

    // Contact-list bookkeeping only, never blocks the upgrade.
    if let Err(e) = state.users.upsert(&identity, user.display_name()).await {
        warn!("Failed to record user {}: {:#}", identity, e);
    }

    let failed_identity = identity.clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!("WebSocket upgrade failed for user {}: {}", failed_identity, e);
        })
        .on_upgrade(move |socket| serve_connection(socket, state, identity)))
}

/// Drive one upgraded socket until either side goes away.
async fn serve_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (sink, stream) = socket.split();

    let (conn, outbound) = Connection::new(identity.clone(), state.ws.connection_buffer);
    let conn_id = conn.id();

    let mut writer = tokio::spawn(run_writer(sink, outbound, state.ws.ping_interval()));
    state.hub.register(conn).await;

    let writer_done = tokio::select! {
        exit = read_until_closed(stream, &identity, conn_id) => {
            debug!("Read loop for connection {} ended: {:?}", conn_id, exit);
            false
        }
        exit = &mut writer => {
            match exit {
                Ok(exit) => debug!("Writer for connection {} ended: {:?}", conn_id, exit),
                Err(e) => warn!("Writer task for connection {} failed: {}", conn_id, e),
            }
            true
        }
    };

    // No-op if this connection has already been replaced or removed.
    state.hub.connection_closed(&identity, conn_id).await;

    if !writer_done
        && tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut writer)
            .await
            .is_err()
    {
        warn!("Writer for connection {} did not stop, aborting", conn_id);
        writer.abort();
    }

    info!("WebSocket connection {} for user {} finished", conn_id, identity);
}
