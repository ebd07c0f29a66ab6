//! Any OAuth2 provider exposing an authorize, token and userinfo endpoint

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;

use crate::adapters::{Adapter, Context};
use crate::error::{AuthError, AuthResult};
use crate::models::User;
use crate::providers::oauth2::{
    IdentityApi, OAuth2Config, OAuth2Flow, OAuth2Token, Profile, TokenExchange,
};
use crate::providers::{AuthIntent, AuthParams, Provider, ProviderType};

fn string_claim(claims: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match claims.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Map a userinfo document onto a [`Profile`]
///
/// # Errors
///
/// Returns `Provider` when the document has neither `sub` nor `id`
pub fn profile_from_userinfo(claims: &Value) -> AuthResult<Profile> {
    let id = string_claim(claims, &["sub", "id"])
        .ok_or_else(|| AuthError::Provider("userinfo response missing subject".to_string()))?;

    // Unverified addresses are not trusted as identity
    let email = match claims.get("email_verified") {
        Some(Value::Bool(false)) => None,
        _ => string_claim(claims, &["email"]),
    };

    Ok(Profile {
        id,
        login: string_claim(claims, &["preferred_username", "login"]),
        name: string_claim(claims, &["name"]),
        email,
        image: string_claim(claims, &["picture", "avatar_url"]),
    })
}

/// Fetches the profile from a userinfo endpoint; has no email listing or orgs
pub struct UserInfoApi {
    http: reqwest::Client,
    userinfo_url: String,
}

impl UserInfoApi {
    #[must_use]
    pub fn new(userinfo_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            userinfo_url: userinfo_url.to_string(),
        }
    }
}

#[async_trait]
impl IdentityApi for UserInfoApi {
    async fn fetch_profile(&self, ctx: &Context, token: &OAuth2Token) -> AuthResult<Profile> {
        ctx.run(async {
            let response = self
                .http
                .get(&self.userinfo_url)
                .header(AUTHORIZATION, format!("Bearer {}", token.access_token))
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| AuthError::Provider(format!("Failed to fetch userinfo: {e}")))?;

            if !response.status().is_success() {
                return Err(AuthError::Provider(format!(
                    "Userinfo request failed with status: {}",
                    response.status()
                )));
            }

            let claims: Value = response
                .json()
                .await
                .map_err(|e| AuthError::Provider(format!("Failed to parse userinfo JSON: {e}")))?;
            profile_from_userinfo(&claims)
        })
        .await
    }

    async fn is_org_member(
        &self,
        _ctx: &Context,
        _token: &OAuth2Token,
        _org: &str,
        _login: &str,
    ) -> AuthResult<bool> {
        Ok(false)
    }
}

pub struct OAuth2Provider {
    id: String,
    name: String,
    flow: OAuth2Flow,
}

impl OAuth2Provider {
    #[must_use]
    pub fn new(id: &str, name: &str, config: OAuth2Config, userinfo_url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            flow: OAuth2Flow::new(id, config, Arc::new(UserInfoApi::new(userinfo_url))),
        }
    }

    #[must_use]
    pub fn with_api(mut self, api: Arc<dyn IdentityApi>) -> Self {
        self.flow = self.flow.with_api(api);
        self
    }

    #[must_use]
    pub fn with_token_exchange(mut self, exchange: Arc<dyn TokenExchange>) -> Self {
        self.flow = self.flow.with_token_exchange(exchange);
        self
    }

    #[must_use]
    pub fn with_allowed_orgs(mut self, orgs: Vec<String>) -> Self {
        self.flow = self.flow.with_allowed_orgs(orgs);
        self
    }
}

#[async_trait]
impl Provider for OAuth2Provider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OAuth2
    }

    async fn begin_auth(
        &self,
        _ctx: &Context,
        _adapter: &dyn Adapter,
        state: &str,
        _params: &AuthParams,
    ) -> AuthResult<AuthIntent> {
        self.flow.begin(state)
    }

    async fn complete_auth(
        &self,
        ctx: &Context,
        adapter: &dyn Adapter,
        params: &AuthParams,
    ) -> AuthResult<User> {
        self.flow.complete(ctx, adapter, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use crate::providers::oauth2::{Endpoint, CODE_VERIFIER_PARAM};
    use crate::testing::mock::{MockIdentityApi, MockTokenExchange};
    use serde_json::json;

    fn provider() -> OAuth2Provider {
        let config = OAuth2Config::new(
            "cid",
            "secret",
            "https://app/auth/gitea/callback",
            Endpoint {
                auth_url: "https://git.example/login/oauth/authorize".to_string(),
                token_url: "https://git.example/login/oauth/access_token".to_string(),
                device_auth_url: None,
            },
            vec!["openid".to_string(), "email".to_string()],
        );
        OAuth2Provider::new("gitea", "Gitea", config, "https://git.example/login/oauth/userinfo")
    }

    #[test]
    fn test_profile_from_oidc_userinfo() {
        let profile = profile_from_userinfo(&json!({
            "sub": "abc-123",
            "email": "dev@example.com",
            "email_verified": true,
            "name": "Dev",
            "preferred_username": "dev",
            "picture": "https://img/dev.png"
        }))
        .unwrap();
        assert_eq!(profile.id, "abc-123");
        assert_eq!(profile.email.as_deref(), Some("dev@example.com"));
        assert_eq!(profile.login.as_deref(), Some("dev"));
        assert_eq!(profile.image.as_deref(), Some("https://img/dev.png"));
    }

    #[test]
    fn test_profile_from_numeric_id_and_unverified_email() {
        let profile = profile_from_userinfo(&json!({
            "id": 99,
            "login": "bob",
            "email": "bob@example.com",
            "email_verified": false
        }))
        .unwrap();
        assert_eq!(profile.id, "99");
        assert_eq!(profile.email, None);

        assert!(matches!(
            profile_from_userinfo(&json!({"email": "x@y.z"})),
            Err(AuthError::Provider(_))
        ));
    }

    #[actix_web::test]
    async fn test_begin_auth_uses_configured_endpoint() {
        let intent = provider()
            .begin_auth(&Context::background(), &MemoryAdapter::new(), "st", &AuthParams::new())
            .await
            .unwrap();
        assert!(intent
            .auth_url()
            .unwrap()
            .starts_with("https://git.example/login/oauth/authorize?"));
    }

    #[actix_web::test]
    async fn test_missing_email_cannot_be_resolved() {
        let provider = provider()
            .with_api(Arc::new(MockIdentityApi::new(Profile {
                id: "1".to_string(),
                ..Profile::default()
            })))
            .with_token_exchange(Arc::new(MockTokenExchange::new(OAuth2Token {
                access_token: "t".to_string(),
                scope: Some("openid email".to_string()),
                ..OAuth2Token::default()
            })));
        let params = AuthParams::new()
            .with("code", "c")
            .with(CODE_VERIFIER_PARAM, "v");

        assert_eq!(
            provider
                .complete_auth(&Context::background(), &MemoryAdapter::new(), &params)
                .await,
            Err(AuthError::NoVerifiedPrimaryEmail)
        );
    }
}
