use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};

/// Role claim carried by platform tokens that may use the admin routes.
pub const ADMIN_ROLE: &str = "admin";

/// JWT claims issued by the platform backend.
/// Implements axum's FromRequestParts for use as an extractor on
/// `Authorization: Bearer` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Platform user id
    pub sub: String,
    /// student, teacher, company, employee or admin
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// Reject non-admin callers with 403.
    pub fn require_admin(&self) -> Result<(), (StatusCode, String)> {
        if self.is_admin() {
            Ok(())
        } else {
            Err((StatusCode::FORBIDDEN, "Admin role required".to_string()))
        }
    }
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Set by the inject_jwt_secret middleware layer
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        crate::auth::jwt::validate_access_token(&jwt_secret.0, token)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}

/// JWT secret stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);
