use std::time::Duration;

use crate::store::StoreError;

/// Errors produced while handling a single client event.
///
/// None of these are fatal to the hub: `PresenceHub::dispatch` logs them and
/// turns them into an optional error frame for the sender.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid event: {0}")]
    Validation(String),

    #[error("join as {claimed} rejected, connection is authenticated as {verified}")]
    IdentityMismatch { claimed: String, verified: String },

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("persistence timed out after {0:?}")]
    Timeout(Duration),
}

impl HubError {
    /// Numeric code carried by `error` frames.
    pub fn code(&self) -> u16 {
        match self {
            HubError::Validation(_) => 400,
            HubError::IdentityMismatch { .. } => 403,
            HubError::NotPermitted(_) => 403,
            HubError::Persistence(StoreError::NotFound(_)) => 404,
            HubError::Persistence(StoreError::Forbidden(_)) => 403,
            HubError::Persistence(StoreError::Invalid(_)) => 400,
            HubError::Persistence(StoreError::Backend(_)) => 502,
            HubError::Timeout(_) => 504,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_error_kind() {
        assert_eq!(HubError::Validation("x".into()).code(), 400);
        assert_eq!(
            HubError::Persistence(StoreError::Forbidden("x".into())).code(),
            403
        );
        assert_eq!(
            HubError::Persistence(StoreError::Backend("x".into())).code(),
            502
        );
        assert_eq!(HubError::Timeout(Duration::from_secs(1)).code(), 504);
    }
}
