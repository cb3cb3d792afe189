//! WebSocket event types.
//!
//! The protocol is server push only: clients never send commands, they only
//! receive these events as text frames.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::messages::Message;

/// Events sent from the hub to connected clients.
///
/// Serialized as `{"event": "<kind>", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum WsEvent {
    /// Every identity currently online, sorted.
    PresenceList(Vec<Identity>),

    /// A freshly stored message for the receiving client.
    NewMessage(Message),
}

impl WsEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WsEvent::PresenceList(_) => "presence-list",
            WsEvent::NewMessage(_) => "new-message",
        }
    }
}
