//! Real-time presence and message delivery.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Browser clients                            │
//! │  - One WebSocket per identity (a newer one replaces it)      │
//! │  - Receives presence-list and new-message events             │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ WebSocket (server push only)
//! ┌──────────────────────────────▼───────────────────────────────┐
//! │  handler: upgrade, writer task + read loop per connection    │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ register / connection_closed
//! ┌──────────────────────────────▼───────────────────────────────┐
//! │  hub: actor owning identity -> connection, presence fan-out  │
//! └──────────────────────────────▲───────────────────────────────┘
//!                                │ lookup
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │  router: pushes stored messages to the receiver, if online   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod connection;
mod handler;
mod hub;
mod router;
mod types;

pub use config::WsConfig;
pub use connection::{
    ChannelError, Connection, ConnectionId, Outbound, ReadExit, WriterExit, read_until_closed,
    run_writer,
};
pub use handler::ws_handler;
pub use hub::WsHub;
pub use router::{DeliveryOutcome, DeliveryRouter};
pub use types::WsEvent;
