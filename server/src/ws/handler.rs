use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Auth is via `?token=JWT`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid or missing
/// 4003 = join identity mismatch (sent by the hub)
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
///
/// A valid token binds the connection to its `sub`. Without a token the
/// connection is anonymous, which is only allowed when `require_token` is
/// off. On auth failure, upgrades then immediately closes with the code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified_user = match params.token.as_deref() {
        Some(token) => match jwt::validate_access_token(&state.jwt_secret, token) {
            Ok(claims) => {
                tracing::info!(
                    user_id = %claims.sub,
                    role = %claims.role,
                    "WebSocket connection authenticated"
                );
                Some(claims.sub)
            }
            Err(err) => {
                let (code, reason) = match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        (CLOSE_TOKEN_EXPIRED, "Token expired")
                    }
                    _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
                };
                return reject(ws, code, reason);
            }
        },
        None if state.require_token => return reject(ws, CLOSE_TOKEN_INVALID, "Token required"),
        None => None,
    };

    ws.on_upgrade(move |socket| actor::run_connection(socket, state, verified_user))
}

fn reject(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    tracing::warn!(close_code = code, reason = reason, "WebSocket auth failed");

    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
