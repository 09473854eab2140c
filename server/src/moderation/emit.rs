use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::presence::Delivery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EmitResponse {
    pub delivered: bool,
}

/// POST /api/users/{user_id}/events: Push an arbitrary event to one user (admin).
/// Offline users are a normal outcome, reported as `delivered: false`.
pub async fn emit_to_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    Json(req): Json<EmitRequest>,
) -> Result<Json<EmitResponse>, (StatusCode, String)> {
    claims.require_admin()?;

    if req.event.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "event must not be empty".to_string()));
    }

    let delivery = state.hub.emit_to_user(&user_id, &req.event, req.payload);
    tracing::info!(
        admin = %claims.sub,
        user_id = %user_id,
        event = %req.event,
        delivery = ?delivery,
        "Server event emitted"
    );

    Ok(Json(EmitResponse {
        delivered: delivery == Delivery::Delivered,
    }))
}
