//! Persistence capabilities consumed by the presence hub.
//!
//! The hub never owns chat or notification state. It calls out through
//! these traits before relaying, and treats what comes back as opaque.
//! `sqlite` holds the bundled backend used by the standalone binary.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use sqlite::SqliteStore;

/// Notification type used by socket-originated notifications.
pub const NOTIFICATION_TYPE_GENERAL: &str = "general";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A chat message as returned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredNotification {
    pub id: String,
    pub receiver_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Chat persistence. Implementations must be safe for concurrent calls.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message: &str,
        chat_id: &str,
    ) -> Result<StoredMessage, StoreError>;

    async fn mark_message_as_read(&self, chat_id: &str, message_id: &str)
        -> Result<(), StoreError>;

    async fn add_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        reaction: &str,
    ) -> Result<(), StoreError>;

    /// Fails with `Forbidden` unless `sender_id` owns the message.
    async fn delete_message(
        &self,
        chat_id: &str,
        message_id: &str,
        sender_id: &str,
    ) -> Result<(), StoreError>;

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        sender_id: &str,
        new_message: &str,
    ) -> Result<(), StoreError>;
}

/// Notification persistence.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        receiver_id: &str,
        title: &str,
        message: &str,
        kind: &str,
    ) -> Result<StoredNotification, StoreError>;
}
