use serde_json::Value;

use crate::error::HubError;
use crate::presence::events::{ClientFrame, ErrorFrame, ServerEvent};
use crate::ws::{Connection, Outbound};

/// Events handled inline by the reader, in the order the client sent them:
/// presence updates and anything that changes a chat's message history.
/// Everything else may run concurrently.
const ORDERED_EVENTS: &[&str] = &["join", "send_message", "edit_message", "delete_message"];

/// Decode an incoming text frame.
///
/// A frame that is not a well-formed envelope is answered with an error
/// frame when a `requestId` can still be recovered from it, and dropped
/// otherwise.
pub fn decode_text(conn: &Connection, text: &str) -> Option<ClientFrame> {
    match ClientFrame::parse(text) {
        Ok(frame) => Some(frame),
        Err(err) => {
            tracing::debug!(
                connection_id = %conn.id,
                error = %err,
                "Failed to decode client frame: {}",
                text.chars().take(100).collect::<String>()
            );
            if let Some(request_id) = recover_request_id(text) {
                send_error(conn, request_id, "", &err);
            }
            None
        }
    }
}

pub fn is_ordered(frame: &ClientFrame) -> bool {
    ORDERED_EVENTS.contains(&frame.event.as_str())
}

fn recover_request_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("requestId")?.as_str().map(str::to_string)
}

fn send_error(conn: &Connection, request_id: String, event: &str, err: &HubError) {
    let frame = ServerEvent::Error(ErrorFrame {
        request_id,
        event: event.to_string(),
        code: err.code(),
        message: err.to_string(),
    });
    if let Ok(text) = frame.to_json() {
        conn.send(Outbound::Text(text.into()));
    }
}
