//! SQLite-backed chat and notification store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ChatStore, NotificationStore, StoreError, StoredMessage, StoredNotification};
use crate::db::DbPool;

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Backend(format!("DB lock error: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join: {}", e)))?
    }
}

fn require(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Fetch (owner, deleted) for a message in a chat.
fn message_owner(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
) -> Result<(String, bool), StoreError> {
    conn.query_row(
        "SELECT sender_id, deleted FROM messages WHERE id = ?1 AND chat_id = ?2",
        params![message_id, chat_id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("message {} in chat {}", message_id, chat_id)))
}

/// Like `message_owner`, but treats soft-deleted messages as missing.
fn live_message_owner(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
) -> Result<String, StoreError> {
    match message_owner(conn, chat_id, message_id)? {
        (_, true) => Err(StoreError::NotFound(format!("message {} was deleted", message_id))),
        (owner, false) => Ok(owner),
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message: &str,
        chat_id: &str,
    ) -> Result<StoredMessage, StoreError> {
        require("senderId", sender_id)?;
        require("receiverId", receiver_id)?;
        require("chatId", chat_id)?;

        let sender_id = sender_id.to_string();
        let receiver_id = receiver_id.to_string();
        let message = message.to_string();
        let chat_id = chat_id.to_string();

        self.with_conn(move |conn| {
            let now: DateTime<Utc> = Utc::now();
            let now_str = now.to_rfc3339();

            let participants: Option<(String, String)> = conn
                .query_row(
                    "SELECT participant_a, participant_b FROM chats WHERE id = ?1",
                    params![chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match participants {
                Some((a, b)) => {
                    let members = [a.as_str(), b.as_str()];
                    if !members.contains(&sender_id.as_str())
                        || !members.contains(&receiver_id.as_str())
                    {
                        return Err(StoreError::Forbidden(format!(
                            "{} and {} are not the participants of chat {}",
                            sender_id, receiver_id, chat_id
                        )));
                    }
                }
                None => {
                    conn.execute(
                        "INSERT INTO chats (id, participant_a, participant_b, created_at) VALUES (?1, ?2, ?3, ?4)",
                        params![chat_id, sender_id, receiver_id, now_str],
                    )?;
                }
            }

            let id = Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, receiver_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, chat_id, sender_id, receiver_id, message, now_str],
            )?;
            conn.execute(
                "UPDATE chats SET last_message_at = ?1 WHERE id = ?2",
                params![now_str, chat_id],
            )?;

            Ok(StoredMessage {
                id,
                chat_id,
                sender_id,
                receiver_id,
                message,
                read: false,
                created_at: now,
            })
        })
        .await
    }

    async fn mark_message_as_read(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();

        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND chat_id = ?2 AND deleted = 0",
                params![message_id, chat_id],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!(
                    "message {} in chat {}",
                    message_id, chat_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn add_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
        reaction: &str,
    ) -> Result<(), StoreError> {
        require("userId", user_id)?;
        require("reaction", reaction)?;

        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let user_id = user_id.to_string();
        let reaction = reaction.to_string();

        self.with_conn(move |conn| {
            live_message_owner(conn, &chat_id, &message_id)?;
            conn.execute(
                "INSERT INTO reactions (message_id, user_id, reaction, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id) DO UPDATE SET reaction = excluded.reaction, created_at = excluded.created_at",
                params![message_id, user_id, reaction, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_message(
        &self,
        chat_id: &str,
        message_id: &str,
        sender_id: &str,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let sender_id = sender_id.to_string();

        self.with_conn(move |conn| {
            let owner = live_message_owner(conn, &chat_id, &message_id)?;
            if owner != sender_id {
                return Err(StoreError::Forbidden(format!(
                    "{} does not own message {}",
                    sender_id, message_id
                )));
            }
            conn.execute(
                "UPDATE messages SET deleted = 1 WHERE id = ?1",
                params![message_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        sender_id: &str,
        new_message: &str,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let sender_id = sender_id.to_string();
        let new_message = new_message.to_string();

        self.with_conn(move |conn| {
            let owner = live_message_owner(conn, &chat_id, &message_id)?;
            if owner != sender_id {
                return Err(StoreError::Forbidden(format!(
                    "{} does not own message {}",
                    sender_id, message_id
                )));
            }
            conn.execute(
                "UPDATE messages SET body = ?1, edited_at = ?2 WHERE id = ?3",
                params![new_message, Utc::now().to_rfc3339(), message_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn create_notification(
        &self,
        receiver_id: &str,
        title: &str,
        message: &str,
        kind: &str,
    ) -> Result<StoredNotification, StoreError> {
        require("receiverId", receiver_id)?;

        let notification = StoredNotification {
            id: Uuid::now_v7().to_string(),
            receiver_id: receiver_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            kind: kind.to_string(),
            read: false,
            created_at: Utc::now(),
        };

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO notifications (id, receiver_id, title, message, type, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    notification.id,
                    notification.receiver_id,
                    notification.title,
                    notification.message,
                    notification.kind,
                    notification.created_at.to_rfc3339(),
                ],
            )?;
            Ok(notification)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn store() -> SqliteStore {
        SqliteStore::new(init_memory_db().unwrap())
    }

    #[tokio::test]
    async fn send_message_creates_chat_on_first_use() {
        let store = store();
        let msg = store
            .send_message("student1", "teacher1", "hi", "chat1")
            .await
            .unwrap();

        assert_eq!(msg.chat_id, "chat1");
        assert_eq!(msg.message, "hi");
        assert!(!msg.read);

        // Reply in the other direction reuses the chat
        store
            .send_message("teacher1", "student1", "hello", "chat1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_message_rejects_outsiders() {
        let store = store();
        store
            .send_message("student1", "teacher1", "hi", "chat1")
            .await
            .unwrap();

        let err = store
            .send_message("intruder", "teacher1", "hey", "chat1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn send_message_rejects_empty_ids() {
        let err = store()
            .send_message("", "teacher1", "hi", "chat1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn mark_read_missing_message_is_not_found() {
        let err = store()
            .mark_message_as_read("chat1", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn reaction_replaces_previous_reaction() {
        let store = store();
        let msg = store
            .send_message("student1", "teacher1", "hi", "chat1")
            .await
            .unwrap();

        store.add_reaction("chat1", &msg.id, "teacher1", "👍").await.unwrap();
        store.add_reaction("chat1", &msg.id, "teacher1", "🎉").await.unwrap();

        let db = store.db.clone();
        let id = msg.id.clone();
        let reactions: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT reaction FROM reactions WHERE message_id = ?1")
                .unwrap();
            stmt.query_map(params![id], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        })
        .await
        .unwrap();
        assert_eq!(reactions, vec!["🎉".to_string()]);
    }

    #[tokio::test]
    async fn only_owner_can_delete_or_edit() {
        let store = store();
        let msg = store
            .send_message("student1", "teacher1", "hi", "chat1")
            .await
            .unwrap();

        let err = store
            .delete_message("chat1", &msg.id, "teacher1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        let err = store
            .edit_message("chat1", &msg.id, "teacher1", "changed")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        store
            .edit_message("chat1", &msg.id, "student1", "hi there")
            .await
            .unwrap();
        store.delete_message("chat1", &msg.id, "student1").await.unwrap();

        // Deleted messages can no longer be read or reacted to
        let err = store.mark_message_as_read("chat1", &msg.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = store
            .add_reaction("chat1", &msg.id, "teacher1", "👍")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_notification_round_trip() {
        let store = store();
        let n = store
            .create_notification("student1", "Grade posted", "You got an A", "general")
            .await
            .unwrap();
        assert_eq!(n.kind, "general");
        assert!(!n.read);

        let db = store.db.clone();
        let count: i64 = tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap();
            conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE receiver_id = 'student1'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        })
        .await
        .unwrap();
        assert_eq!(count, 1);
    }
}
