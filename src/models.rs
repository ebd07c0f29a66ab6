//! Persisted authentication records
//!
//! These are plain data. Storage backends own them; the session manager, CSRF guard
//! and providers only pass them around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::codec::Versioned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    OAuth2,
    Oidc,
    Saml,
    Email,
    WebAuthn,
}

/// A link between a user and one identity at one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub provider: String,
    pub provider_account_id: String,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn new(account_type: AccountType, provider: &str, provider_account_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_type,
            provider: provider.to_string(),
            provider_account_id: provider_account_id.to_string(),
            refresh_token: None,
            access_token: None,
            expires_at: None,
            token_type: None,
            scope: None,
            id_token: None,
            session_state: None,
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether both records point at the same external identity
    #[must_use]
    pub fn same_identity(&self, other: &Account) -> bool {
        self.provider == other.provider && self.provider_account_id == other.provider_account_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: Option<bool>,
    pub image: Option<String>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(name: &str, email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            email_verified: None,
            image: None,
            accounts: Vec::new(),
            sessions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }
}

/// Anti-forgery token bound to one session
///
/// Tokens are never edited in place. A successful guarded request swaps the whole
/// value for a fresh one with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CsrfToken {
    #[must_use]
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            expires_at,
        }
    }

    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Constant-time comparison against a submitted token
    #[must_use]
    pub fn is_valid(&self, candidate: &str) -> bool {
        if self.token.is_empty() || candidate.is_empty() {
            return false;
        }
        self.token.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub session_token: String,
    pub csrf_token: CsrfToken,
    pub user_id: Uuid,
    /// Populated on read; never written back by adapters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Box<User>>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A session is usable only before its expiry
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Single-use token for passwordless flows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Versioned for User {
    const KIND: &'static str = "user";
    const VERSION: u16 = 1;
}

impl Versioned for Account {
    const KIND: &'static str = "account";
    const VERSION: u16 = 1;
}

impl Versioned for Session {
    const KIND: &'static str = "session";
    const VERSION: u16 = 1;
}

impl Versioned for CsrfToken {
    const KIND: &'static str = "csrf_token";
    const VERSION: u16 = 1;
}

impl Versioned for VerificationToken {
    const KIND: &'static str = "verification_token";
    const VERSION: u16 = 1;
}
