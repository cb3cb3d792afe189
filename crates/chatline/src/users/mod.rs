//! Known users: the contact list shown next to conversations.
//!
//! Credentials live elsewhere. An identity lands here the first time it opens
//! a WebSocket, and configured dev users are seeded at startup.

mod repository;

pub use repository::{User, UserRepository, UserStore};
