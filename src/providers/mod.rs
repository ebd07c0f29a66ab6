//! External identity providers
//!
//! A [`Provider`] turns a login into a [`User`]. `begin_auth` produces the redirect to
//! the provider; `complete_auth` consumes the callback parameters and returns the
//! persisted user. Both default to `Unimplemented`, so a provider only overrides the
//! capabilities it has.

pub mod generic;
pub mod github;
pub mod oauth2;
pub mod registry;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapters::{Adapter, Context};
use crate::error::{AuthError, AuthResult};
use crate::models::User;

pub use generic::OAuth2Provider;
pub use github::GitHubProvider;
pub use registry::{ProviderRegistry, RegistryBuilder, SharedRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OAuth2,
    Oidc,
    Saml,
    Email,
    WebAuthn,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OAuth2 => "oauth2",
            Self::Oidc => "oidc",
            Self::Saml => "saml",
            Self::Email => "email",
            Self::WebAuthn => "webauthn",
        };
        f.write_str(name)
    }
}

/// Parameters handed to a provider, usually the callback query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthParams(HashMap<String, String>);

impl AuthParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, treating empty values as absent
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Parse a raw query string; undecodable input yields empty params
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        )
    }
}

impl From<HashMap<String, String>> for AuthParams {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Where to send the user, and what to remember until they come back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIntent {
    auth_url: String,
    pub state: String,
    /// PKCE verifier; persist it with the state, it is needed to complete the login
    pub code_verifier: String,
}

impl AuthIntent {
    #[must_use]
    pub fn new(auth_url: String, state: String, code_verifier: String) -> Self {
        Self {
            auth_url,
            state,
            code_verifier,
        }
    }

    /// The provider's authorization URL
    ///
    /// # Errors
    ///
    /// Returns `NoAuthUrl` if the provider produced no URL
    pub fn auth_url(&self) -> AuthResult<&str> {
        if self.auth_url.is_empty() {
            return Err(AuthError::NoAuthUrl);
        }
        Ok(&self.auth_url)
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn provider_type(&self) -> ProviderType;

    /// Start a login bound to `state`
    async fn begin_auth(
        &self,
        _ctx: &Context,
        _adapter: &dyn Adapter,
        _state: &str,
        _params: &AuthParams,
    ) -> AuthResult<AuthIntent> {
        Err(AuthError::Unimplemented)
    }

    /// Finish a login from the callback parameters and return the stored user
    async fn complete_auth(
        &self,
        _ctx: &Context,
        _adapter: &dyn Adapter,
        _params: &AuthParams,
    ) -> AuthResult<User> {
        Err(AuthError::Unimplemented)
    }
}

/// Provider with an identity but no capabilities
#[derive(Debug, Clone)]
pub struct UnimplementedProvider {
    id: String,
    name: String,
    provider_type: ProviderType,
}

impl UnimplementedProvider {
    #[must_use]
    pub fn new(id: &str, name: &str, provider_type: ProviderType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider_type,
        }
    }
}

impl Provider for UnimplementedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}
