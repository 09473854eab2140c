use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::auth::middleware::Claims;
use crate::moderation::emit::EmitResponse;
use crate::presence::Delivery;
use crate::state::AppState;

/// Event pushed to a user whose account was blocked.
pub const ACCOUNT_BLOCKED_EVENT: &str = "accountBlocked";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub user_id: String,
    #[serde(default)]
    pub reason: String,
}

/// POST /api/moderation/block: Tell an online user their account was blocked (admin).
/// The block itself is recorded by the platform backend; this only notifies.
pub async fn block_user(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<BlockRequest>,
) -> Result<Json<EmitResponse>, (StatusCode, String)> {
    claims.require_admin()?;

    if req.user_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "userId must not be empty".to_string()));
    }

    let payload = json!({
        "reason": req.reason,
        "blockedAt": Utc::now(),
    });
    let delivery = state
        .hub
        .emit_to_user(&req.user_id, ACCOUNT_BLOCKED_EVENT, payload);

    tracing::info!(
        admin = %claims.sub,
        user_id = %req.user_id,
        online = delivery != Delivery::Offline,
        "Account block pushed"
    );

    Ok(Json(EmitResponse {
        delivered: delivery == Delivery::Delivered,
    }))
}
