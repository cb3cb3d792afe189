//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::messages::MessageStore;
use crate::users::UserStore;
use crate::ws::{DeliveryRouter, WsConfig, WsHub};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Presence directory.
    pub hub: WsHub,
    /// Pushes stored messages to online receivers.
    pub router: DeliveryRouter,
    /// Durable message storage.
    pub store: Arc<dyn MessageStore>,
    /// Known users for the contact list.
    pub users: Arc<dyn UserStore>,
    /// Authentication state.
    pub auth: AuthState,
    /// Per-connection tuning.
    pub ws: WsConfig,
}

impl AppState {
    pub fn new(
        hub: WsHub,
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        auth: AuthState,
        ws: WsConfig,
    ) -> Self {
        Self {
            router: DeliveryRouter::new(hub.clone()),
            hub,
            store,
            users,
            auth,
            ws,
        }
    }
}
