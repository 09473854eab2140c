use std::sync::Arc;

use crate::presence::PresenceHub;
use crate::store::NotificationStore;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Presence registry and event relay
    pub hub: Arc<PresenceHub>,
    /// Used directly by the HTTP notification route
    pub notifications: Arc<dyn NotificationStore>,
    /// HS256 secret shared with the platform backend
    pub jwt_secret: Vec<u8>,
    /// Reject WebSocket upgrades that carry no token
    pub require_token: bool,
}
