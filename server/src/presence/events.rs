//! Wire shapes for hub events.
//!
//! Frames are JSON text: `{"event": <name>, "data": <payload>}`. Client
//! frames may also carry a `requestId`, in which case the hub answers with
//! an `ack` or `error` frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;

/// Raw client frame, before the payload is decoded for its event name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, HubError> {
        serde_json::from_str(text).map_err(|e| HubError::Validation(e.to_string()))
    }

    /// Decode this frame into a typed event.
    pub fn decode(&self) -> Result<ClientEvent, HubError> {
        let event = match self.event.as_str() {
            "join" => ClientEvent::Join(payload(&self.data)?),
            "send_message" => ClientEvent::SendMessage(payload(&self.data)?),
            "typing" => ClientEvent::Typing(payload(&self.data)?),
            "read_message" => ClientEvent::ReadMessage(payload(&self.data)?),
            "react_message" => ClientEvent::ReactMessage(payload(&self.data)?),
            "delete_message" => ClientEvent::DeleteMessage(payload(&self.data)?),
            "edit_message" => ClientEvent::EditMessage(payload(&self.data)?),
            "send_notification" => ClientEvent::SendNotification(payload(&self.data)?),
            other => return Err(HubError::Validation(format!("unknown event {:?}", other))),
        };
        event.validate()?;
        Ok(event)
    }
}

fn payload<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, HubError> {
    T::deserialize(data).map_err(|e| HubError::Validation(e.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join(JoinPayload),
    SendMessage(SendMessage),
    Typing(Typing),
    ReadMessage(ReadMessage),
    ReactMessage(ReactMessage),
    DeleteMessage(DeleteMessage),
    EditMessage(EditMessage),
    SendNotification(SendNotification),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::ReadMessage(_) => "read_message",
            ClientEvent::ReactMessage(_) => "react_message",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::EditMessage(_) => "edit_message",
            ClientEvent::SendNotification(_) => "send_notification",
        }
    }

    /// Reject events whose identifying fields are blank.
    fn validate(&self) -> Result<(), HubError> {
        let fields: Vec<(&str, &str)> = match self {
            ClientEvent::Join(p) => vec![("userId", p.user_id())],
            ClientEvent::SendMessage(p) => vec![
                ("senderId", p.sender_id.as_str()),
                ("receiverId", p.receiver_id.as_str()),
                ("chatId", p.chat_id.as_str()),
            ],
            ClientEvent::Typing(p) => vec![
                ("senderId", p.sender_id.as_str()),
                ("receiverId", p.receiver_id.as_str()),
            ],
            ClientEvent::ReadMessage(p) => vec![
                ("chatId", p.chat_id.as_str()),
                ("messageId", p.message_id.as_str()),
                ("senderId", p.sender_id.as_str()),
                ("receiverId", p.receiver_id.as_str()),
            ],
            ClientEvent::ReactMessage(p) => vec![
                ("chatId", p.chat_id.as_str()),
                ("messageId", p.message_id.as_str()),
                ("userId", p.user_id.as_str()),
                ("receiverId", p.receiver_id.as_str()),
            ],
            ClientEvent::DeleteMessage(p) => vec![
                ("chatId", p.chat_id.as_str()),
                ("messageId", p.message_id.as_str()),
                ("senderId", p.sender_id.as_str()),
                ("receiverId", p.receiver_id.as_str()),
            ],
            ClientEvent::EditMessage(p) => vec![
                ("chatId", p.chat_id.as_str()),
                ("messageId", p.message_id.as_str()),
                ("senderId", p.sender_id.as_str()),
                ("receiverId", p.receiver_id.as_str()),
            ],
            ClientEvent::SendNotification(p) => vec![("receiverId", p.receiver_id.as_str())],
        };

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(HubError::Validation(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

/// `join` accepts either `{"userId": "..."}` or a bare string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JoinPayload {
    Object {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Bare(String),
}

impl JoinPayload {
    pub fn new(user_id: impl Into<String>) -> Self {
        JoinPayload::Object {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            JoinPayload::Object { user_id } | JoinPayload::Bare(user_id) => user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub sender_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessage {
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactMessage {
    pub chat_id: String,
    pub message_id: String,
    pub user_id: String,
    pub reaction: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub new_message: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotification {
    pub receiver_id: String,
    pub title: String,
    pub message: String,
}

// --- Hub to client ---

/// Payload of `receive_message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRelay {
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub reactions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRelay {
    pub sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdited {
    pub message_id: String,
    pub chat_id: String,
    pub new_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRelay {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub request_id: String,
    pub event: String,
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub request_id: String,
    pub event: String,
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<String>),
    #[serde(rename = "receive_message")]
    ReceiveMessage(MessageRelay),
    #[serde(rename = "typing")]
    Typing(TypingRelay),
    #[serde(rename = "message_read")]
    MessageRead(MessageRef),
    #[serde(rename = "message_reaction")]
    MessageReaction(ReactMessage),
    #[serde(rename = "message_deleted")]
    MessageDeleted(MessageRef),
    #[serde(rename = "message_edited")]
    MessageEdited(MessageEdited),
    #[serde(rename = "receive_notification")]
    ReceiveNotification(NotificationRelay),
    #[serde(rename = "ack")]
    Ack(Ack),
    #[serde(rename = "error")]
    Error(ErrorFrame),
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Encode an arbitrary named event, for server-side pushes.
pub fn custom_event(event: &str, data: Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::json!({ "event": event, "data": data }))
}
