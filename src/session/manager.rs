use std::sync::Arc;

use actix_web::{HttpMessage, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use uuid::Uuid;

use crate::adapters::{Adapter, Context};
use crate::error::{AuthError, AuthResult};
use crate::models::Session;
use crate::session::cookie::CookieFactory;
use crate::utils::crypto::{derive_encryption_key, mask_token};

/// Default session lifetime
pub const DEFAULT_SESSION_DURATION_HOURS: u64 = 24;

/// Longest session lifetime accepted from settings (ten years)
pub const MAX_SESSION_DURATION_HOURS: u64 = 10 * 365 * 24;

// =============================================================================
// Session Manager Structure
// =============================================================================

/// Session lifecycle on top of a storage adapter
///
/// The manager holds no session state itself. Every call goes through the adapter, and
/// adapter errors are narrowed to the session sentinels callers can act on.
#[derive(Clone)]
pub struct SessionManager {
    adapter: Arc<dyn Adapter>,
    session_duration_hours: u64,
    cookie_factory: CookieFactory,
}

// =============================================================================
// 1. Construction
// =============================================================================

impl SessionManager {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn Adapter>,
        key: &[u8],
        cookie_secure: bool,
        session_duration_hours: u64,
    ) -> Self {
        let cookie_factory = CookieFactory::new(
            derive_encryption_key(key),
            cookie_secure,
            session_duration_hours,
        );

        Self {
            adapter,
            session_duration_hours,
            cookie_factory,
        }
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    #[must_use]
    pub const fn cookie_factory(&self) -> &CookieFactory {
        &self.cookie_factory
    }

    /// Configured lifetime, or `None` when it does not fit a calendar duration
    #[must_use]
    pub fn session_lifetime(&self) -> Option<Duration> {
        i64::try_from(self.session_duration_hours)
            .ok()
            .and_then(Duration::try_hours)
    }

    fn expiry_from_now(&self) -> AuthResult<DateTime<Utc>> {
        self.session_lifetime()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                warn!(
                    "Session lifetime of {} hours is out of range",
                    self.session_duration_hours
                );
                AuthError::BadSession
            })
    }
}

// =============================================================================
// 2. Lifecycle
// =============================================================================

impl SessionManager {
    /// Issue a new session and CSRF token for `user_id`
    ///
    /// # Errors
    ///
    /// Returns `BadSession` if the adapter cannot persist the session or the configured
    /// lifetime is out of range
    pub async fn create_session(
        &self,
        ctx: &Context,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthResult<Session> {
        let expires_at = match expires_at {
            Some(expires_at) => expires_at,
            None => self.expiry_from_now()?,
        };
        self.adapter
            .create_session(ctx, user_id, expires_at)
            .await
            .map_err(|e| {
                warn!("Failed to create session for user {user_id}: {e}");
                e.or_sentinel(AuthError::BadSession)
            })
    }

    /// Look up a session; expired sessions are returned and must be checked with `is_valid`
    ///
    /// # Errors
    ///
    /// Returns `MissingSession` if the token is unknown
    pub async fn get_session(&self, ctx: &Context, session_token: &str) -> AuthResult<Session> {
        self.adapter
            .get_session(ctx, session_token)
            .await
            .map_err(|e| {
                debug!("Session lookup for {} failed: {e}", mask_token(session_token));
                e.or_sentinel(AuthError::MissingSession)
            })
    }

    /// Persist the session as given
    ///
    /// # Errors
    ///
    /// Returns `BadSession` if the adapter rejects the write
    pub async fn update_session(&self, ctx: &Context, session: &Session) -> AuthResult<Session> {
        self.adapter
            .update_session(ctx, session)
            .await
            .map_err(|e| e.or_sentinel(AuthError::BadSession))
    }

    /// Slide the session expiry forward by the configured lifetime
    ///
    /// # Errors
    ///
    /// Returns `BadSession` if the adapter rejects the write
    pub async fn refresh_session(&self, ctx: &Context, session: &Session) -> AuthResult<Session> {
        let mut refreshed = session.clone();
        refreshed.expires_at = self.expiry_from_now()?;
        self.adapter
            .refresh_session(ctx, &refreshed)
            .await
            .map_err(|e| e.or_sentinel(AuthError::BadSession))
    }

    /// Remove the session and its CSRF token
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the adapter fails
    pub async fn delete_session(&self, ctx: &Context, session_token: &str) -> AuthResult<()> {
        self.adapter
            .delete_session(ctx, session_token)
            .await
            .map_err(|e| e.or_sentinel(AuthError::BadRequest))
    }
}

// =============================================================================
// 3. Request Binding
// =============================================================================

impl SessionManager {
    /// Resolve the session behind the request's cookie and bind it to the request
    ///
    /// # Errors
    ///
    /// Returns `MissingSession` if there is no readable cookie, the session is unknown
    /// or it has expired
    pub async fn load_request_session(&self, ctx: &Context, req: &HttpRequest) -> AuthResult<Session> {
        let token = self
            .cookie_factory
            .session_token_from_request(req)
            .ok_or(AuthError::MissingSession)?;

        let session = self.get_session(ctx, &token).await?;
        if !session.is_valid() {
            debug!("Session {} has expired", mask_token(&token));
            return Err(AuthError::MissingSession);
        }

        req.extensions_mut().insert(session.clone());
        Ok(session)
    }
}

/// The session bound to this request by [`SessionManager::load_request_session`]
///
/// # Errors
///
/// Returns `MissingSession` if no session was bound
pub fn session_from_request(req: &HttpRequest) -> AuthResult<Session> {
    req.extensions()
        .get::<Session>()
        .cloned()
        .ok_or(AuthError::MissingSession)
}

/// Replace the session bound to this request
pub fn bind_session(req: &HttpRequest, session: Session) {
    req.extensions_mut().insert(session);
}

// =============================================================================
// 4. Tests
// =============================================================================
