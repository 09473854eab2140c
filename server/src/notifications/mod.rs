use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::presence::Delivery;
use crate::state::AppState;
use crate::store::{StoreError, StoredNotification, NOTIFICATION_TYPE_GENERAL};

/// Event name shared with the socket path.
pub const RECEIVE_NOTIFICATION_EVENT: &str = "receive_notification";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub receiver_id: String,
    pub title: String,
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateNotificationResponse {
    pub notification: StoredNotification,
    pub delivered: bool,
}

/// POST /api/notifications: Persist a notification and push it to the
/// receiver if online (admin). Unlike the socket path, the pushed payload
/// is the full stored notification.
pub async fn create_notification(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), (StatusCode, String)> {
    claims.require_admin()?;

    if req.receiver_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "receiverId must not be empty".to_string()));
    }
    let kind = req
        .kind
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or(NOTIFICATION_TYPE_GENERAL);

    let deadline = state.hub.config().persistence_timeout();
    let notification = tokio::time::timeout(
        deadline,
        state
            .notifications
            .create_notification(&req.receiver_id, &req.title, &req.message, kind),
    )
    .await
    .map_err(|_| {
        tracing::warn!(receiver_id = %req.receiver_id, "Notification persistence timed out");
        (StatusCode::GATEWAY_TIMEOUT, "Persistence timed out".to_string())
    })?
    .map_err(store_error_response)?;

    let payload = serde_json::to_value(&notification)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let delivery = state
        .hub
        .emit_to_user(&req.receiver_id, RECEIVE_NOTIFICATION_EVENT, payload);

    tracing::info!(
        admin = %claims.sub,
        receiver_id = %req.receiver_id,
        notification_id = %notification.id,
        delivery = ?delivery,
        "Notification created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateNotificationResponse {
            notification,
            delivered: delivery == Delivery::Delivered,
        }),
    ))
}

fn store_error_response(err: StoreError) -> (StatusCode, String) {
    let status = match &err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        StoreError::Backend(_) => StatusCode::BAD_GATEWAY,
    };
    tracing::warn!(error = %err, "Notification persistence failed");
    (status, err.to_string())
}
