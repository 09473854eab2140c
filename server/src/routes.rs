use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::auth::middleware::{Claims, JwtSecret};
use crate::moderation::{block, emit};
use crate::notifications;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let public_routes = Router::new().route("/health", get(health_check));

    // Any authenticated user
    let authenticated_routes = Router::new().route("/api/presence", get(online_users));

    // Admin only; each handler checks the role claim
    let admin_routes = Router::new()
        .route("/api/users/{user_id}/events", post(emit::emit_to_user))
        .route("/api/moderation/block", post(block::block_user))
        .route("/api/notifications", post(notifications::create_notification));

    Router::new()
        .merge(ws_routes)
        .merge(public_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "online": state.hub.registry().online_count(),
    }))
}

/// GET /api/presence: currently online user ids, unordered.
async fn online_users(State(state): State<AppState>, _claims: Claims) -> Json<Vec<String>> {
    Json(state.hub.online_users())
}
