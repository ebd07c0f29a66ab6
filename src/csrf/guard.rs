use actix_web::{http::header, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use log::debug;

use super::config::CsrfConfig;
use super::extractor::FormFields;
use crate::adapters::Context;
use crate::error::{AuthError, AuthResult};
use crate::models::CsrfToken;
use crate::session::{bind_session, session_from_request, SessionManager};
use crate::utils::logging::LoggingHelper;

/// What the guard decided for an allowed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfOutcome {
    /// The bypass predicate matched
    Bypassed,
    /// The method is exempt; the session token is unchanged
    Ignored,
    /// The submitted token matched and was replaced by this one
    Rotated(CsrfToken),
}

/// Validate-and-rotate CSRF check bound to the request's session
#[derive(Clone)]
pub struct CsrfGuard {
    config: CsrfConfig,
    sessions: SessionManager,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(config: CsrfConfig, sessions: SessionManager) -> Self {
        Self { config, sessions }
    }

    #[must_use]
    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Run the check against a request whose session is already bound
    ///
    /// `form` carries the decoded body for form-field extraction.
    ///
    /// # Errors
    ///
    /// - `MissingSession` when no session is bound to the request
    /// - `UntrustedOrigin` when the `Origin` header is not trusted
    /// - `MissingToken` when no token was submitted
    /// - `TokenNotFound` when the stored token expired or does not match
    /// - `GenerateTokenFailed` when a replacement token cannot be minted
    /// - `BadSession` when the rotated token cannot be stored
    pub async fn check(
        &self,
        ctx: &Context,
        req: &HttpRequest,
        form: Option<&FormFields>,
    ) -> AuthResult<CsrfOutcome> {
        if self.config.next.as_ref().is_some_and(|next| next(req)) {
            return Ok(CsrfOutcome::Bypassed);
        }

        let mut session = session_from_request(req)?;

        if self.config.is_ignored(req.method()) {
            return Ok(CsrfOutcome::Ignored);
        }

        if let Some(origin) = req.headers().get(header::ORIGIN) {
            let origin = origin.to_str().map_err(|_| AuthError::UntrustedOrigin)?;
            if !self.config.is_trusted_origin(origin) {
                return Err(AuthError::UntrustedOrigin);
            }
        }

        let candidate = self.config.extractor.extract(req, form)?;

        if session.csrf_token.has_expired() || !session.csrf_token.is_valid(&candidate) {
            return Err(AuthError::TokenNotFound);
        }

        let token = (self.config.token_generator)().map_err(|e| {
            debug!("CSRF token generator failed: {e}");
            AuthError::GenerateTokenFailed
        })?;
        if token.is_empty() {
            return Err(AuthError::GenerateTokenFailed);
        }

        let idle = chrono::Duration::from_std(self.config.idle_timeout)
            .map_err(|_| AuthError::GenerateTokenFailed)?;
        let expires_at = Utc::now()
            .checked_add_signed(idle)
            .ok_or(AuthError::GenerateTokenFailed)?;
        session.csrf_token = CsrfToken::new(token, expires_at);

        let session = self.sessions.update_session(ctx, &session).await?;
        let rotated = session.csrf_token.clone();
        LoggingHelper::log_csrf_rotated(&session.session_token);

        bind_session(req, session);
        req.extensions_mut().insert(rotated.clone());

        Ok(CsrfOutcome::Rotated(rotated))
    }

    /// [`check`](Self::check) with failures rendered by the configured error handler
    ///
    /// # Errors
    ///
    /// Returns the error handler's response when the request is rejected
    pub async fn protect(
        &self,
        ctx: &Context,
        req: &HttpRequest,
        form: Option<&FormFields>,
    ) -> Result<CsrfOutcome, HttpResponse> {
        self.check(ctx, req, form).await.map_err(|err| {
            LoggingHelper::log_csrf_rejected(req.method().as_str(), req.path(), &err);
            (self.config.error_handler)(req, &err)
        })
    }
}

/// The token minted by the last successful check on this request
///
/// # Errors
///
/// Returns `TokenNotFound` if the guard has not rotated a token for this request
pub fn token_from_request(req: &HttpRequest) -> AuthResult<String> {
    req.extensions()
        .get::<CsrfToken>()
        .map(|t| t.token.clone())
        .ok_or(AuthError::TokenNotFound)
}
