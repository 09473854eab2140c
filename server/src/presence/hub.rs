//! The presence and relay hub.
//!
//! Owns the presence registry and routes chat events from a sender
//! connection to the target user's connection when that user is online.
//! Every side effect is persisted through the injected stores first; a
//! failed or timed-out persistence call drops the relay and is logged, it
//! never takes the connection or the hub down.

use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::config::HubConfig;
use crate::error::HubError;
use crate::presence::events::{
    self, Ack, ClientEvent, ClientFrame, DeleteMessage, EditMessage, ErrorFrame, JoinPayload,
    MessageEdited, MessageRef, MessageRelay, NotificationRelay, ReactMessage, ReadMessage,
    SendMessage, SendNotification, ServerEvent, Typing, TypingRelay,
};
use crate::presence::registry::{Delivery, PresenceRegistry};
use crate::store::{ChatStore, NotificationStore, StoreError, NOTIFICATION_TYPE_GENERAL};
use crate::ws::{Connection, Outbound};

/// WebSocket close code sent when `join` contradicts the handshake identity.
pub const CLOSE_IDENTITY_MISMATCH: u16 = 4003;

/// What the transport should do after a frame was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close { code: u16, reason: String },
}

/// Identifiers attached to persistence failure logs.
#[derive(Clone, Copy, Default)]
struct LogContext<'a> {
    chat_id: Option<&'a str>,
    message_id: Option<&'a str>,
}

pub struct PresenceHub {
    registry: Arc<PresenceRegistry>,
    chats: Arc<dyn ChatStore>,
    notifications: Arc<dyn NotificationStore>,
    config: HubConfig,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceHub {
    pub fn new(
        chats: Arc<dyn ChatStore>,
        notifications: Arc<dyn NotificationStore>,
        config: HubConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: PresenceRegistry::new(),
            chats,
            notifications,
            config,
            broadcaster: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Start the periodic online-user broadcast. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.broadcaster.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        // Weak so a dropped hub also ends the task
        let hub = Arc::downgrade(self);
        let period = self.config.presence_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                hub.broadcast_online_users();
            }
        }));

        tracing::info!(interval_secs = period.as_secs(), "Presence broadcaster started");
    }

    /// Stop the periodic broadcast.
    pub fn stop(&self) {
        let handle = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Presence broadcaster stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // --- Connection lifecycle ---

    pub fn on_connect(&self, conn: &Connection) {
        self.registry.attach(conn.id, conn.sender().clone());
        tracing::info!(
            connection_id = %conn.id,
            verified_user = conn.verified_user.as_deref().unwrap_or("-"),
            "Connection established"
        );
    }

    pub fn on_join(&self, conn: &Connection, payload: JoinPayload) -> Result<(), HubError> {
        let user_id = payload.user_id();
        if let Some(verified) = &conn.verified_user {
            if verified != user_id {
                return Err(HubError::IdentityMismatch {
                    claimed: user_id.to_string(),
                    verified: verified.clone(),
                });
            }
        }

        if let Some(replaced) = self.registry.join(user_id, conn.id) {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %conn.id,
                replaced = %replaced,
                "User rejoined on a new connection"
            );
        }
        tracing::info!(user_id = %user_id, connection_id = %conn.id, "User joined");

        self.broadcast_online_users();
        Ok(())
    }

    pub fn on_disconnect(&self, conn: &Connection) {
        match self.registry.detach(conn.id) {
            Some(user_id) => {
                tracing::info!(user_id = %user_id, connection_id = %conn.id, "User went offline")
            }
            None => tracing::debug!(connection_id = %conn.id, "Connection closed"),
        }
        self.broadcast_online_users();
    }

    pub fn online_users(&self) -> Vec<String> {
        self.registry.online_users()
    }

    /// Send the full online-user list to every connection.
    pub fn broadcast_online_users(&self) {
        let users = self.registry.online_users();
        let count = users.len();
        let Some(frame) = encode(&ServerEvent::OnlineUsers(users)) else {
            return;
        };
        let reached = self.registry.broadcast(&frame);
        tracing::debug!(online = count, connections = reached, "Broadcast online users");
    }

    /// Push an arbitrary event to a user, for server-side code paths
    /// (account blocked, notifications created over HTTP).
    pub fn emit_to_user(&self, user_id: &str, event: &str, data: Value) -> Delivery {
        match events::custom_event(event, data) {
            Ok(text) => self.registry.send_to_user(user_id, Outbound::Text(text.into())),
            Err(e) => {
                tracing::error!(event = %event, error = %e, "Failed to encode event");
                Delivery::Dropped
            }
        }
    }

    // --- Event handling ---

    /// Handle one client frame. This is the only entry point the transport
    /// uses; it never fails, errors become optional `error` frames.
    pub async fn dispatch(&self, conn: &Connection, frame: ClientFrame) -> Flow {
        let request_id = frame.request_id.clone();

        let event = match frame.decode() {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(
                    connection_id = %conn.id,
                    event = %frame.event,
                    error = %err,
                    "Rejected malformed event"
                );
                self.reply_error(conn, request_id, &frame.event, &err);
                return Flow::Continue;
            }
        };

        let name = event.name();
        match self.handle(conn, event).await {
            Ok(delivery) => {
                if let Some(request_id) = request_id {
                    self.reply(
                        conn,
                        &ServerEvent::Ack(Ack {
                            request_id,
                            event: name.to_string(),
                            delivered: delivery == Delivery::Delivered,
                        }),
                    );
                }
                Flow::Continue
            }
            Err(err @ HubError::IdentityMismatch { .. }) => {
                tracing::warn!(connection_id = %conn.id, error = %err, "Closing connection");
                self.reply_error(conn, request_id, name, &err);
                Flow::Close {
                    code: CLOSE_IDENTITY_MISMATCH,
                    reason: "Identity mismatch".to_string(),
                }
            }
            Err(err) => {
                if !matches!(err, HubError::Persistence(_) | HubError::Timeout(_)) {
                    // Persistence failures were already logged with their ids
                    tracing::warn!(
                        connection_id = %conn.id,
                        event = name,
                        error = %err,
                        "Event rejected"
                    );
                }
                self.reply_error(conn, request_id, name, &err);
                Flow::Continue
            }
        }
    }

    /// Route a decoded event to its handler.
    pub async fn handle(
        &self,
        conn: &Connection,
        event: ClientEvent,
    ) -> Result<Delivery, HubError> {
        match event {
            ClientEvent::Join(payload) => self.on_join(conn, payload).map(|()| Delivery::Delivered),
            ClientEvent::SendMessage(p) => self.on_send_message(conn, p).await,
            ClientEvent::Typing(p) => self.on_typing(conn, p),
            ClientEvent::ReadMessage(p) => self.on_read_message(conn, p).await,
            ClientEvent::ReactMessage(p) => self.on_react_message(conn, p).await,
            ClientEvent::DeleteMessage(p) => self.on_delete_message(conn, p).await,
            ClientEvent::EditMessage(p) => self.on_edit_message(conn, p).await,
            ClientEvent::SendNotification(p) => self.on_send_notification(conn, p).await,
        }
    }

    pub async fn on_send_message(
        &self,
        conn: &Connection,
        p: SendMessage,
    ) -> Result<Delivery, HubError> {
        ensure_actor(conn, &p.sender_id)?;

        let ctx = LogContext {
            chat_id: Some(&p.chat_id),
            message_id: None,
        };
        let stored = self
            .persist(
                "send_message",
                ctx,
                self.chats
                    .send_message(&p.sender_id, &p.receiver_id, &p.message, &p.chat_id),
            )
            .await?;

        let receiver_id = p.receiver_id.clone();
        let relay = MessageRelay {
            sender_id: p.sender_id,
            receiver_id: p.receiver_id,
            message: p.message,
            chat_id: p.chat_id,
            message_id: Some(stored.id),
            read: false,
            created_at: stored.created_at,
            reactions: Vec::new(),
        };
        Ok(self.relay(&receiver_id, &ServerEvent::ReceiveMessage(relay)))
    }

    /// Pure relay, nothing is persisted.
    pub fn on_typing(&self, conn: &Connection, p: Typing) -> Result<Delivery, HubError> {
        ensure_actor(conn, &p.sender_id)?;
        Ok(self.relay(
            &p.receiver_id,
            &ServerEvent::Typing(TypingRelay {
                sender_id: p.sender_id.clone(),
            }),
        ))
    }

    /// Relays `message_read` back to the original sender.
    pub async fn on_read_message(
        &self,
        conn: &Connection,
        p: ReadMessage,
    ) -> Result<Delivery, HubError> {
        // The reader is the receiver of the original message
        ensure_actor(conn, &p.receiver_id)?;

        let ctx = LogContext {
            chat_id: Some(&p.chat_id),
            message_id: Some(&p.message_id),
        };
        self.persist(
            "read_message",
            ctx,
            self.chats.mark_message_as_read(&p.chat_id, &p.message_id),
        )
        .await?;

        Ok(self.relay(
            &p.sender_id,
            &ServerEvent::MessageRead(MessageRef {
                message_id: p.message_id,
                chat_id: p.chat_id,
            }),
        ))
    }

    pub async fn on_react_message(
        &self,
        conn: &Connection,
        p: ReactMessage,
    ) -> Result<Delivery, HubError> {
        ensure_actor(conn, &p.user_id)?;

        let ctx = LogContext {
            chat_id: Some(&p.chat_id),
            message_id: Some(&p.message_id),
        };
        self.persist(
            "react_message",
            ctx,
            self.chats
                .add_reaction(&p.chat_id, &p.message_id, &p.user_id, &p.reaction),
        )
        .await?;

        let receiver_id = p.receiver_id.clone();
        Ok(self.relay(&receiver_id, &ServerEvent::MessageReaction(p)))
    }

    pub async fn on_delete_message(
        &self,
        conn: &Connection,
        p: DeleteMessage,
    ) -> Result<Delivery, HubError> {
        ensure_actor(conn, &p.sender_id)?;

        let ctx = LogContext {
            chat_id: Some(&p.chat_id),
            message_id: Some(&p.message_id),
        };
        self.persist(
            "delete_message",
            ctx,
            self.chats
                .delete_message(&p.chat_id, &p.message_id, &p.sender_id),
        )
        .await?;

        Ok(self.relay(
            &p.receiver_id,
            &ServerEvent::MessageDeleted(MessageRef {
                message_id: p.message_id.clone(),
                chat_id: p.chat_id.clone(),
            }),
        ))
    }

    pub async fn on_edit_message(
        &self,
        conn: &Connection,
        p: EditMessage,
    ) -> Result<Delivery, HubError> {
        ensure_actor(conn, &p.sender_id)?;

        let ctx = LogContext {
            chat_id: Some(&p.chat_id),
            message_id: Some(&p.message_id),
        };
        self.persist(
            "edit_message",
            ctx,
            self.chats
                .edit_message(&p.chat_id, &p.message_id, &p.sender_id, &p.new_message),
        )
        .await?;

        Ok(self.relay(
            &p.receiver_id,
            &ServerEvent::MessageEdited(MessageEdited {
                message_id: p.message_id,
                chat_id: p.chat_id,
                new_message: p.new_message,
            }),
        ))
    }

    pub async fn on_send_notification(
        &self,
        _conn: &Connection,
        p: SendNotification,
    ) -> Result<Delivery, HubError> {
        self.persist(
            "send_notification",
            LogContext::default(),
            self.notifications.create_notification(
                &p.receiver_id,
                &p.title,
                &p.message,
                NOTIFICATION_TYPE_GENERAL,
            ),
        )
        .await?;

        Ok(self.relay(
            &p.receiver_id,
            &ServerEvent::ReceiveNotification(NotificationRelay {
                title: p.title,
                message: p.message,
            }),
        ))
    }

    // --- Helpers ---

    /// Await a persistence call under the configured deadline, logging any failure.
    async fn persist<T, F>(
        &self,
        event: &'static str,
        ctx: LogContext<'_>,
        call: F,
    ) -> Result<T, HubError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let deadline = self.config.persistence_timeout();
        let err = match timeout(deadline, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => HubError::Persistence(e),
            Err(_) => HubError::Timeout(deadline),
        };

        tracing::warn!(
            event,
            chat_id = ctx.chat_id,
            message_id = ctx.message_id,
            error = %err,
            "Persistence failed, event not relayed"
        );
        Err(err)
    }

    fn relay(&self, user_id: &str, event: &ServerEvent) -> Delivery {
        let Some(frame) = encode(event) else {
            return Delivery::Dropped;
        };
        self.registry.send_to_user(user_id, frame)
    }

    fn reply(&self, conn: &Connection, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.registry.send_to_connection(conn.id, frame);
        }
    }

    fn reply_error(
        &self,
        conn: &Connection,
        request_id: Option<String>,
        event: &str,
        err: &HubError,
    ) {
        let Some(request_id) = request_id else {
            return;
        };
        self.reply(
            conn,
            &ServerEvent::Error(ErrorFrame {
                request_id,
                event: event.to_string(),
                code: err.code(),
                message: err.to_string(),
            }),
        );
    }
}

impl Drop for PresenceHub {
    fn drop(&mut self) {
        self.stop();
    }
}

/// On an authenticated connection, the acting user named in a payload must
/// be the token subject.
fn ensure_actor(conn: &Connection, acting_user: &str) -> Result<(), HubError> {
    match &conn.verified_user {
        Some(verified) if verified != acting_user => Err(HubError::NotPermitted(format!(
            "connection is authenticated as {}, event acts as {}",
            verified, acting_user
        ))),
        _ => Ok(()),
    }
}

fn encode(event: &ServerEvent) -> Option<Outbound> {
    match event.to_json() {
        Ok(text) => Some(Outbound::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}
