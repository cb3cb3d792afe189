//! HTTP handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::auth::CurrentUser;
use crate::identity::Identity;
use crate::messages::{Message, NewMessage, SendMessageRequest};
use crate::users::User;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub online: Vec<Identity>,
}

/// Identities currently holding a live connection.
pub async fn presence(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online: state.hub.online().await,
    })
}

/// Everyone the caller can message.
///
/// GET /api/messages/users
#[instrument(skip(state, user), fields(user = %user.id()))]
pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<User>>> {
    let users = state.users.list_except(&user.identity()).await?;
    Ok(Json(users))
}

/// Conversation between the caller and `peer`, oldest first.
///
/// GET /api/messages/{id}
#[instrument(skip(state, user), fields(user = %user.id()))]
pub async fn get_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(peer): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .store
        .conversation(&user.identity(), &Identity::new(peer))
        .await?;
    Ok(Json(messages))
}

/// Store a message, then push it to the receiver if they are online.
///
/// POST /api/messages/send/{id}
#[instrument(skip(state, user, request), fields(user = %user.id()))]
pub async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(receiver): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let new_message =
        NewMessage::new(user.identity(), Identity::new(receiver), request).validate()?;

    let stored = state.store.insert(new_message).await?;

    let outcome = state.router.deliver(&stored).await;
    debug!(message_id = %stored.id, ?outcome, "Message sent");

    Ok((StatusCode::CREATED, Json(stored)))
}
