//! HTTP API module.
//!
//! REST endpoints for sending and listing messages, plus the WebSocket
//! upgrade endpoint.

mod error;
pub mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
