//! Best-effort delivery of stored messages to live recipients.

use log::{debug, warn};

use super::hub::WsHub;
use super::types::WsEvent;
use crate::messages::Message;

/// What happened to a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the receiver's connection.
    Delivered,
    /// Receiver has no live connection; nothing was sent.
    Offline,
    /// Receiver's connection was broken and has been unregistered.
    Failed,
}

/// Pushes freshly persisted messages to their receiver's connection.
#[derive(Debug, Clone)]
pub struct DeliveryRouter {
    hub: WsHub,
}

impl DeliveryRouter {
    pub fn new(hub: WsHub) -> Self {
        Self { hub }
    }

    /// Route `message` to its receiver if they are online.
    ///
    /// Never fails from the caller's point of view; there is no retry and no
    /// queue for offline receivers.
    pub async fn deliver(&self, message: &Message) -> DeliveryOutcome {
        let receiver = &message.receiver_identity;

        let Some(conn) = self.hub.lookup(receiver).await else {
            debug!("User {} is offline, message {} not pushed", receiver, message.id);
            return DeliveryOutcome::Offline;
        };

        match conn.send_event(&WsEvent::NewMessage(message.clone())) {
            Ok(()) => {
                debug!(
                    "Delivered message {} to user {} on connection {}",
                    message.id,
                    receiver,
                    conn.id()
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!("Failed to deliver message {} to user {}: {}", message.id, receiver, e);
                self.hub.connection_closed(receiver, conn.id()).await;
                DeliveryOutcome::Failed
            }
        }
    }
}
