//! Chatline library.
//!
//! Real-time presence and best-effort message delivery for a request/response
//! chat service.

pub mod api;
pub mod auth;
pub mod db;
pub mod identity;
pub mod messages;
pub mod users;
pub mod ws;
