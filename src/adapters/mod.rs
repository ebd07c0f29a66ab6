//! Persistence contract for authentication state
//!
//! Every backend implements [`Adapter`]. Methods default to `Unimplemented`, so a
//! backend only has to provide the operations its deployment actually uses. Backends
//! translate their own failures into [`AuthError`] sentinels before returning.

pub mod context;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::models::{Account, Session, User, VerificationToken};

pub use context::{CancelHandle, Context};
pub use memory::MemoryAdapter;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Insert a user, or merge into the existing user with the same email
    ///
    /// Accounts on the incoming user are merged by `(provider, provider_account_id)`.
    async fn create_user(&self, _ctx: &Context, _user: User) -> AuthResult<User> {
        Err(AuthError::Unimplemented)
    }

    async fn get_user(&self, _ctx: &Context, _id: Uuid) -> AuthResult<User> {
        Err(AuthError::Unimplemented)
    }

    /// Find the user linked to an external identity; `MissingUser` when none is linked
    async fn get_user_by_account(
        &self,
        _ctx: &Context,
        _provider: &str,
        _provider_account_id: &str,
    ) -> AuthResult<User> {
        Err(AuthError::Unimplemented)
    }

    async fn get_user_by_email(&self, _ctx: &Context, _email: &str) -> AuthResult<User> {
        Err(AuthError::Unimplemented)
    }

    async fn update_user(&self, _ctx: &Context, _user: User) -> AuthResult<User> {
        Err(AuthError::Unimplemented)
    }

    /// Remove a user together with its accounts and sessions
    async fn delete_user(&self, _ctx: &Context, _id: Uuid) -> AuthResult<()> {
        Err(AuthError::Unimplemented)
    }

    async fn link_account(&self, _ctx: &Context, _account_id: Uuid, _user_id: Uuid) -> AuthResult<()> {
        Err(AuthError::Unimplemented)
    }

    async fn unlink_account(&self, _ctx: &Context, _account_id: Uuid) -> AuthResult<()> {
        Err(AuthError::Unimplemented)
    }

    /// Persist a new session and its CSRF token as one write
    async fn create_session(
        &self,
        _ctx: &Context,
        _user_id: Uuid,
        _expires_at: DateTime<Utc>,
    ) -> AuthResult<Session> {
        Err(AuthError::Unimplemented)
    }

    /// Load a session with its user and CSRF token; expired sessions are still returned
    async fn get_session(&self, _ctx: &Context, _session_token: &str) -> AuthResult<Session> {
        Err(AuthError::Unimplemented)
    }

    async fn update_session(&self, _ctx: &Context, _session: &Session) -> AuthResult<Session> {
        Err(AuthError::Unimplemented)
    }

    async fn refresh_session(&self, _ctx: &Context, _session: &Session) -> AuthResult<Session> {
        Err(AuthError::Unimplemented)
    }

    async fn delete_session(&self, _ctx: &Context, _session_token: &str) -> AuthResult<()> {
        Err(AuthError::Unimplemented)
    }

    async fn create_verification_token(
        &self,
        _ctx: &Context,
        _token: VerificationToken,
    ) -> AuthResult<VerificationToken> {
        Err(AuthError::Unimplemented)
    }

    /// Consume a verification token; a second use of the same token fails
    async fn use_verification_token(
        &self,
        _ctx: &Context,
        _identifier: &str,
        _token: &str,
    ) -> AuthResult<VerificationToken> {
        Err(AuthError::Unimplemented)
    }
}

/// Baseline backend where every operation fails with `Unimplemented`
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedAdapter;

impl Adapter for UnimplementedAdapter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_unimplemented_adapter_fails_everything() {
        let adapter = UnimplementedAdapter;
        let ctx = Context::background();

        assert_eq!(
            adapter.get_user(&ctx, Uuid::new_v4()).await,
            Err(AuthError::Unimplemented)
        );
        assert_eq!(
            adapter.get_user_by_account(&ctx, "github", "1").await,
            Err(AuthError::Unimplemented)
        );
        assert_eq!(
            adapter.get_session(&ctx, "token").await,
            Err(AuthError::Unimplemented)
        );
        assert_eq!(
            adapter.create_session(&ctx, Uuid::new_v4(), Utc::now()).await,
            Err(AuthError::Unimplemented)
        );
        assert_eq!(
            adapter.use_verification_token(&ctx, "a@b.c", "t").await,
            Err(AuthError::Unimplemented)
        );
    }
}
