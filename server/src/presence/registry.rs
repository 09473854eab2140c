//! Presence registry.
//!
//! Maps each online user to the one connection that most recently joined
//! as that user. Last join wins; a disconnect only removes a mapping that
//! still points at the disconnecting connection.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ws::{ConnectionId, ConnectionSender, Outbound};

/// Result of routing a frame to a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target connection.
    Delivered,
    /// Target user has no mapped connection.
    Offline,
    /// Mapped, but the outbound queue is full or its writer is gone.
    Dropped,
}

#[derive(Default)]
pub struct PresenceRegistry {
    /// userId -> connection that last joined as that user
    online: DashMap<String, ConnectionId>,
    /// connection -> userId it joined as (reverse index for O(1) disconnect)
    owners: DashMap<ConnectionId, String>,
    /// Every accepted connection, joined or not
    connections: DashMap<ConnectionId, ConnectionSender>,
}

impl PresenceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track an accepted connection so it receives broadcasts.
    pub fn attach(&self, id: ConnectionId, sender: ConnectionSender) {
        self.connections.insert(id, sender);
    }

    /// Map `user_id` to `id`, replacing any earlier mapping for the user.
    ///
    /// Returns the connection that previously held the user, if it was a
    /// different one.
    pub fn join(&self, user_id: &str, id: ConnectionId) -> Option<ConnectionId> {
        // A connection re-joining under another identity gives up the old one
        if let Some(previous_user) = self.owners.insert(id, user_id.to_string()) {
            if previous_user != user_id {
                self.online.remove_if(&previous_user, |_, owner| *owner == id);
            }
        }

        self.online
            .insert(user_id.to_string(), id)
            .filter(|previous| *previous != id)
    }

    /// Forget a connection. Returns the user it was still serving, if any.
    pub fn detach(&self, id: ConnectionId) -> Option<String> {
        self.connections.remove(&id);
        let (_, user_id) = self.owners.remove(&id)?;
        self.online
            .remove_if(&user_id, |_, owner| *owner == id)
            .map(|(user_id, _)| user_id)
    }

    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionId> {
        self.online.get(user_id).map(|entry| *entry.value())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }

    /// All online user ids, unordered.
    pub fn online_users(&self) -> Vec<String> {
        self.online.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue a frame for the connection currently mapped to `user_id`.
    pub fn send_to_user(&self, user_id: &str, frame: Outbound) -> Delivery {
        let Some(id) = self.connection_of(user_id) else {
            return Delivery::Offline;
        };
        self.send_to_connection(id, frame)
    }

    pub fn send_to_connection(&self, id: ConnectionId, frame: Outbound) -> Delivery {
        // Clone the sender out so no map shard stays locked during try_send
        let Some(sender) = self.connections.get(&id).map(|s| s.value().clone()) else {
            return Delivery::Offline;
        };
        match sender.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "Outbound queue full, dropping frame");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }

    /// Queue a frame for every attached connection. Returns how many accepted it.
    pub fn broadcast(&self, frame: &Outbound) -> usize {
        let senders: Vec<(ConnectionId, ConnectionSender)> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut queued = 0;
        for (id, sender) in senders {
            match sender.try_send(frame.clone()) {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Broadcast frame dropped")
                }
            }
        }
        queued
    }
}
