//! Authentication error taxonomy
//!
//! Every failure the core can report is one of these sentinels. Storage backends
//! translate their own failures into them at the adapter boundary, so nothing above
//! the adapter ever sees a raw backend error.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Result alias used across the crate
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing session")]
    MissingSession,

    #[error("missing csrf token in request")]
    MissingToken,

    #[error("csrf token not found in session")]
    TokenNotFound,

    #[error("failed to generate csrf token")]
    GenerateTokenFailed,

    #[error("bad session")]
    BadSession,

    #[error("bad request")]
    BadRequest,

    #[error("missing user")]
    MissingUser,

    #[error("not implemented")]
    Unimplemented,

    #[error("no verified primary email found")]
    NoVerifiedPrimaryEmail,

    #[error("user not in allowed org")]
    NotAllowedOrg,

    #[error("failed to parse auth params, missing code or verifier")]
    AuthParseFailed,

    #[error("no auth url")]
    NoAuthUrl,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("request origin is not trusted")]
    UntrustedOrigin,

    #[error("oauth state does not match the pending login")]
    StateMismatch,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("identity provider error: {0}")]
    Provider(String),
}

impl AuthError {
    /// Whether the error came from the caller's context rather than the operation itself
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, AuthError::Cancelled | AuthError::DeadlineExceeded)
    }

    /// Replace the error with `sentinel` unless it is a cancellation or deadline
    #[must_use]
    pub fn or_sentinel(self, sentinel: AuthError) -> AuthError {
        if self.is_interrupted() {
            self
        } else {
            sentinel
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingSession | AuthError::BadSession => StatusCode::UNAUTHORIZED,
            AuthError::MissingToken
            | AuthError::TokenNotFound
            | AuthError::GenerateTokenFailed
            | AuthError::UntrustedOrigin
            | AuthError::StateMismatch
            | AuthError::NoVerifiedPrimaryEmail
            | AuthError::NotAllowedOrg => StatusCode::FORBIDDEN,
            AuthError::MissingUser | AuthError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            AuthError::BadRequest | AuthError::AuthParseFailed => StatusCode::BAD_REQUEST,
            AuthError::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            AuthError::NoAuthUrl | AuthError::Provider(_) => StatusCode::BAD_GATEWAY,
            AuthError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_sentinel_keeps_interruptions() {
        assert_eq!(
            AuthError::Cancelled.or_sentinel(AuthError::BadSession),
            AuthError::Cancelled
        );
        assert_eq!(
            AuthError::DeadlineExceeded.or_sentinel(AuthError::BadSession),
            AuthError::DeadlineExceeded
        );
        assert_eq!(
            AuthError::MissingUser.or_sentinel(AuthError::BadSession),
            AuthError::BadSession
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::TokenNotFound.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::NotAllowedOrg.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::MissingSession.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::UnknownProvider("gitlab".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AuthError::Unimplemented.status_code(), StatusCode::NOT_IMPLEMENTED);
    }
}
