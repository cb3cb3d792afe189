//! Message data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identity;

/// A persisted chat message.
///
/// This is the record the store returns after a durable write and the exact
/// payload of a `new-message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_identity: Identity,
    pub receiver_identity: Identity,
    pub text: Option<String>,
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: Identity,
    pub receiver: Identity,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

/// Request body for sending a message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "imageURL", alias = "image")]
    pub image_url: Option<String>,
}

/// Rejections raised before a message reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageValidationError {
    #[error("invalid receiver identity")]
    MissingReceiver,

    #[error("message text or image is required")]
    EmptyContent,
}

impl NewMessage {
    pub fn new(sender: Identity, receiver: Identity, request: SendMessageRequest) -> Self {
        Self {
            sender,
            receiver,
            text: request.text,
            image_url: request.image_url,
        }
    }

    /// Normalize blank fields to `None` and check the content invariant.
    pub fn validate(mut self) -> Result<Self, MessageValidationError> {
        if self.receiver.is_empty() {
            return Err(MessageValidationError::MissingReceiver);
        }

        self.text = self.text.filter(|t| !t.trim().is_empty());
        self.image_url = self.image_url.filter(|u| !u.trim().is_empty());

        if self.text.is_none() && self.image_url.is_none() {
            return Err(MessageValidationError::EmptyContent);
        }

        Ok(self)
    }
}
