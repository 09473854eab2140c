//! Campus relay: real-time presence and chat relay server.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod moderation;
pub mod notifications;
pub mod presence;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;

use std::sync::Arc;

use config::{Config, StorageBackend};
use presence::PresenceHub;
use store::SqliteStore;

/// Build the application state for a loaded config: open the configured
/// store, resolve the JWT secret and create the (not yet started) hub.
pub fn build_state(config: &Config) -> Result<state::AppState, Box<dyn std::error::Error>> {
    let db = match config.storage_backend {
        StorageBackend::Sqlite => db::init_db(&config.data_dir)?,
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, nothing survives a restart");
            db::init_memory_db()?
        }
    };
    let store = Arc::new(SqliteStore::new(db));

    let jwt_secret = auth::jwt::resolve_jwt_secret(config.jwt_secret.as_deref(), &config.data_dir)?;
    if !config.hub.require_token {
        tracing::warn!("require_token is off, anonymous connections may join as any user");
    }

    let hub = PresenceHub::new(store.clone(), store.clone(), config.hub.clone());

    Ok(state::AppState {
        hub,
        notifications: store,
        jwt_secret,
        require_token: config.hub.require_token,
    })
}
