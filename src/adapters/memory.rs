//! In-memory reference backend
//!
//! Holds everything in one `RwLock`-guarded store. Suitable for tests and
//! single-process deployments; all state is lost on restart.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use uuid::Uuid;

use super::{Adapter, Context};
use crate::error::{AuthError, AuthResult};
use crate::models::{Account, CsrfToken, Session, User, VerificationToken};
use crate::utils::crypto::{generate_csrf_token, generate_session_token};

/// Lifetime of the CSRF token minted alongside a new session
pub const SESSION_CSRF_TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Default)]
struct Store {
    users: HashMap<Uuid, User>,
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<String, Session>,
    verification_tokens: HashMap<(String, String), VerificationToken>,
}

impl Store {
    fn user_id_by_email(&self, email: &str) -> Option<Uuid> {
        self.users
            .values()
            .find(|u| u.email == email)
            .map(|u| u.id)
    }

    /// Attach accounts and sessions to a stored user; the sessions carry no nested user
    fn hydrate(&self, id: Uuid) -> AuthResult<User> {
        let mut user = self.users.get(&id).cloned().ok_or(AuthError::MissingUser)?;
        user.accounts = self
            .accounts
            .values()
            .filter(|a| a.user_id == Some(id))
            .cloned()
            .collect();
        user.accounts.sort_by_key(|a| a.created_at);
        user.sessions = self
            .sessions
            .values()
            .filter(|s| s.user_id == id)
            .cloned()
            .collect();
        user.sessions.sort_by_key(|s| s.expires_at);
        Ok(user)
    }

    fn merge_account(&mut self, user_id: Uuid, incoming: Account) {
        let now = Utc::now();
        if let Some(existing) = self
            .accounts
            .values_mut()
            .find(|a| a.same_identity(&incoming))
        {
            existing.account_type = incoming.account_type;
            existing.access_token = incoming.access_token;
            existing.refresh_token = incoming.refresh_token;
            existing.expires_at = incoming.expires_at;
            existing.token_type = incoming.token_type;
            existing.scope = incoming.scope;
            existing.id_token = incoming.id_token;
            existing.session_state = incoming.session_state;
            existing.user_id = Some(user_id);
            existing.updated_at = now;
            return;
        }

        let mut account = incoming;
        account.user_id = Some(user_id);
        account.updated_at = now;
        self.accounts.insert(account.id, account);
    }

    fn prune_expired_sessions(&mut self, now: DateTime<Utc>) {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        let pruned = before - self.sessions.len();
        if pruned > 0 {
            debug!("pruned {pruned} expired sessions");
        }
    }

    fn session_with_user(&self, session: &Session) -> AuthResult<Session> {
        let mut session = session.clone();
        session.user = Some(Box::new(self.hydrate(session.user_id)?));
        Ok(session)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    store: RwLock<Store>,
}

impl MemoryAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AuthResult<RwLockReadGuard<'_, Store>> {
        self.store.read().map_err(|_| {
            warn!("memory store lock poisoned");
            AuthError::BadRequest
        })
    }

    fn write(&self) -> AuthResult<RwLockWriteGuard<'_, Store>> {
        self.store.write().map_err(|_| {
            warn!("memory store lock poisoned");
            AuthError::BadRequest
        })
    }

    /// Number of stored sessions
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the store lock is poisoned
    pub fn session_count(&self) -> AuthResult<usize> {
        Ok(self.read()?.sessions.len())
    }

    /// Number of stored accounts, linked or not
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the store lock is poisoned
    pub fn account_count(&self) -> AuthResult<usize> {
        Ok(self.read()?.accounts.len())
    }

    fn overwrite_session(&self, session: &Session) -> AuthResult<Session> {
        let mut store = self.write()?;
        let stored = store
            .sessions
            .get_mut(&session.session_token)
            .ok_or(AuthError::BadSession)?;
        stored.csrf_token = session.csrf_token.clone();
        stored.expires_at = session.expires_at;
        let stored = stored.clone();
        store.session_with_user(&stored)
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn create_user(&self, ctx: &Context, user: User) -> AuthResult<User> {
        ctx.run(async {
            let mut store = self.write()?;
            let now = Utc::now();

            let id = if let Some(id) = store.user_id_by_email(&user.email) {
                if let Some(existing) = store.users.get_mut(&id) {
                    if !user.name.is_empty() {
                        existing.name.clone_from(&user.name);
                    }
                    if user.image.is_some() {
                        existing.image.clone_from(&user.image);
                    }
                    if user.email_verified.is_some() {
                        existing.email_verified = user.email_verified;
                    }
                    existing.updated_at = now;
                }
                debug!("merging login into existing user {id}");
                id
            } else {
                let mut stored = user.clone();
                stored.accounts.clear();
                stored.sessions.clear();
                stored.updated_at = now;
                store.users.insert(stored.id, stored);
                user.id
            };

            for account in user.accounts {
                store.merge_account(id, account);
            }

            store.hydrate(id)
        })
        .await
    }

    async fn get_user(&self, ctx: &Context, id: Uuid) -> AuthResult<User> {
        ctx.run(async { self.read()?.hydrate(id) }).await
    }

    async fn get_user_by_account(
        &self,
        ctx: &Context,
        provider: &str,
        provider_account_id: &str,
    ) -> AuthResult<User> {
        ctx.run(async {
            let store = self.read()?;
            let user_id = store
                .accounts
                .values()
                .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
                .and_then(|a| a.user_id)
                .ok_or(AuthError::MissingUser)?;
            store.hydrate(user_id)
        })
        .await
    }

    async fn get_user_by_email(&self, ctx: &Context, email: &str) -> AuthResult<User> {
        ctx.run(async {
            let store = self.read()?;
            let id = store.user_id_by_email(email).ok_or(AuthError::MissingUser)?;
            store.hydrate(id)
        })
        .await
    }

    async fn update_user(&self, ctx: &Context, user: User) -> AuthResult<User> {
        ctx.run(async {
            let mut store = self.write()?;
            if store
                .user_id_by_email(&user.email)
                .is_some_and(|owner| owner != user.id)
            {
                return Err(AuthError::BadRequest);
            }
            let existing = store.users.get_mut(&user.id).ok_or(AuthError::MissingUser)?;
            existing.name = user.name;
            existing.email = user.email;
            existing.email_verified = user.email_verified;
            existing.image = user.image;
            existing.updated_at = Utc::now();
            store.hydrate(user.id)
        })
        .await
    }

    async fn delete_user(&self, ctx: &Context, id: Uuid) -> AuthResult<()> {
        ctx.run(async {
            let mut store = self.write()?;
            store.users.remove(&id).ok_or(AuthError::MissingUser)?;
            store.accounts.retain(|_, a| a.user_id != Some(id));
            store.sessions.retain(|_, s| s.user_id != id);
            Ok(())
        })
        .await
    }

    async fn link_account(&self, ctx: &Context, account_id: Uuid, user_id: Uuid) -> AuthResult<()> {
        ctx.run(async {
            let mut store = self.write()?;
            if !store.users.contains_key(&user_id) {
                return Err(AuthError::MissingUser);
            }
            let account = store
                .accounts
                .get_mut(&account_id)
                .ok_or(AuthError::BadRequest)?;
            account.user_id = Some(user_id);
            account.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn unlink_account(&self, ctx: &Context, account_id: Uuid) -> AuthResult<()> {
        ctx.run(async {
            let mut store = self.write()?;
            let account = store
                .accounts
                .get_mut(&account_id)
                .ok_or(AuthError::BadRequest)?;
            account.user_id = None;
            account.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn create_session(
        &self,
        ctx: &Context,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Session> {
        ctx.run(async {
            let mut store = self.write()?;
            if !store.users.contains_key(&user_id) {
                return Err(AuthError::BadSession);
            }
            let now = Utc::now();
            store.prune_expired_sessions(now);

            let csrf_expires_at = now
                .checked_add_signed(Duration::hours(SESSION_CSRF_TOKEN_LIFETIME_HOURS))
                .ok_or(AuthError::GenerateTokenFailed)?;
            let session = Session {
                id: Uuid::new_v4(),
                session_token: generate_session_token(),
                csrf_token: CsrfToken::new(generate_csrf_token(), csrf_expires_at),
                user_id,
                user: None,
                expires_at,
            };
            store
                .sessions
                .insert(session.session_token.clone(), session.clone());
            store.session_with_user(&session)
        })
        .await
    }

    async fn get_session(&self, ctx: &Context, session_token: &str) -> AuthResult<Session> {
        ctx.run(async {
            let store = self.read()?;
            let session = store
                .sessions
                .get(session_token)
                .ok_or(AuthError::MissingSession)?;
            store.session_with_user(session)
        })
        .await
    }

    async fn update_session(&self, ctx: &Context, session: &Session) -> AuthResult<Session> {
        ctx.run(async { self.overwrite_session(session) }).await
    }

    async fn refresh_session(&self, ctx: &Context, session: &Session) -> AuthResult<Session> {
        ctx.run(async { self.overwrite_session(session) }).await
    }

    async fn delete_session(&self, ctx: &Context, session_token: &str) -> AuthResult<()> {
        ctx.run(async {
            self.write()?.sessions.remove(session_token);
            Ok(())
        })
        .await
    }

    async fn create_verification_token(
        &self,
        ctx: &Context,
        token: VerificationToken,
    ) -> AuthResult<VerificationToken> {
        ctx.run(async {
            let key = (token.identifier.clone(), token.token.clone());
            self.write()?.verification_tokens.insert(key, token.clone());
            Ok(token)
        })
        .await
    }

    async fn use_verification_token(
        &self,
        ctx: &Context,
        identifier: &str,
        token: &str,
    ) -> AuthResult<VerificationToken> {
        ctx.run(async {
            let stored = self
                .write()?
                .verification_tokens
                .remove(&(identifier.to_string(), token.to_string()))
                .ok_or(AuthError::BadRequest)?;
            if stored.expires_at <= Utc::now() {
                debug!("verification token for {identifier} used after expiry");
                return Err(AuthError::BadRequest);
            }
            Ok(stored)
        })
        .await
    }
}
