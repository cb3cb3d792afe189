//! Chat messages: data model and the durable store collaborator.

mod models;
mod repository;

pub use models::{Message, MessageValidationError, NewMessage, SendMessageRequest};
pub use repository::{MessageRepository, MessageStore};
