//! Authorization-code-with-PKCE login shared by OAuth2-family providers
//!
//! [`OAuth2Flow`] owns the algorithm: redirect, code exchange, profile fetch, email
//! resolution, org allow-list and user materialization. Talking to the provider is
//! delegated to two seams, [`TokenExchange`] for the token endpoint and
//! [`IdentityApi`] for profile, email and org lookups, so the algorithm runs the same
//! against GitHub, a generic userinfo endpoint or a test double.

pub mod pkce;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Deserialize;
use url::Url;

use crate::adapters::{Adapter, Context};
use crate::error::{AuthError, AuthResult};
use crate::models::{Account, AccountType, User};
use crate::providers::{AuthIntent, AuthParams};
use crate::utils::logging::LoggingHelper;

pub use pkce::{code_challenge_s256, generate_pkce_pair, PkcePair, CHALLENGE_METHOD};

/// Callback parameter carrying the verifier persisted at `begin`
pub const CODE_VERIFIER_PARAM: &str = "code_verifier";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub auth_url: String,
    pub token_url: String,
    pub device_auth_url: Option<String>,
}

/// Client registration at one provider
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub endpoint: Endpoint,
    pub scopes: Vec<String>,
    http: reqwest::Client,
}

impl OAuth2Config {
    #[must_use]
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_url: &str,
        endpoint: Endpoint,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_url: redirect_url.to_string(),
            endpoint,
            scopes,
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Authorization URL for `state` with an S256 challenge
    ///
    /// # Errors
    ///
    /// Returns `NoAuthUrl` if the authorize endpoint is not a valid URL
    pub fn auth_code_url(&self, state: &str, code_challenge: &str) -> AuthResult<String> {
        let mut url = Url::parse(&self.endpoint.auth_url).map_err(|e| {
            warn!("Invalid authorize endpoint {}: {e}", self.endpoint.auth_url);
            AuthError::NoAuthUrl
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        Ok(url.to_string())
    }
}

/// Tokens returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OAuth2Token {
    pub access_token: String,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes the provider says it granted, verbatim
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

impl OAuth2Token {
    /// Granted scopes, if the provider reported them
    ///
    /// GitHub separates scopes with commas, RFC 6749 with spaces; both are accepted.
    #[must_use]
    pub fn granted_scopes(&self) -> Option<Vec<String>> {
        self.scope.as_ref().map(|scope| {
            scope
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    id_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Parse a token endpoint body; providers may report errors with a 200 status
///
/// # Errors
///
/// Returns `Provider` if the body is not JSON, carries an `error`, or lacks an access token
pub fn parse_token_body(body: &str) -> AuthResult<OAuth2Token> {
    let raw: RawTokenResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::Provider(format!("token response is not valid JSON: {e}")))?;

    if let Some(error) = raw.error {
        let detail = raw.error_description.unwrap_or_default();
        return Err(AuthError::Provider(format!(
            "token endpoint error {error}: {detail}"
        )));
    }

    let access_token = raw
        .access_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::Provider("token response missing access_token".to_string()))?;

    Ok(OAuth2Token {
        access_token,
        token_type: raw.token_type,
        refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
        expires_at: raw
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs)),
        scope: raw.scope,
        id_token: raw.id_token.filter(|t| !t.is_empty()),
    })
}

/// Exchanges an authorization code for tokens
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        ctx: &Context,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<OAuth2Token>;
}

#[async_trait]
impl TokenExchange for OAuth2Config {
    async fn exchange(
        &self,
        ctx: &Context,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<OAuth2Token> {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "authorization_code".to_string());
        form.insert("code", code.trim().to_string());
        form.insert("redirect_uri", self.redirect_url.clone());
        form.insert("client_id", self.client_id.clone());
        form.insert("code_verifier", code_verifier.to_string());
        if !self.client_secret.is_empty() {
            form.insert("client_secret", self.client_secret.clone());
        }

        ctx.run(async {
            let response = self
                .http
                .post(&self.endpoint.token_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(&form)
                .send()
                .await
                .map_err(|e| AuthError::Provider(format!("token exchange request failed: {e}")))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AuthError::Provider(format!("token response read failed: {e}")))?;

            if !status.is_success() {
                return Err(AuthError::Provider(format!(
                    "token endpoint returned status={}",
                    status.as_u16()
                )));
            }

            parse_token_body(&body)
        })
        .await
    }
}

/// Identity as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    /// Stable provider account id
    pub id: String,
    /// Handle used for org membership lookups
    pub login: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailEntry {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmailPage {
    pub emails: Vec<EmailEntry>,
    /// `None` on the last page
    pub next_page: Option<u32>,
}

/// Provider-side lookups made with the user's access token
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn fetch_profile(&self, ctx: &Context, token: &OAuth2Token) -> AuthResult<Profile>;

    /// One page of the user's addresses; pages start at 1
    async fn list_emails(
        &self,
        _ctx: &Context,
        _token: &OAuth2Token,
        _page: u32,
    ) -> AuthResult<EmailPage> {
        Ok(EmailPage::default())
    }

    async fn is_org_member(
        &self,
        _ctx: &Context,
        _token: &OAuth2Token,
        _org: &str,
        _login: &str,
    ) -> AuthResult<bool> {
        Err(AuthError::Unimplemented)
    }
}

/// The login algorithm for one configured provider
pub struct OAuth2Flow {
    provider_id: String,
    config: OAuth2Config,
    exchange: Arc<dyn TokenExchange>,
    api: Arc<dyn IdentityApi>,
    allowed_orgs: Vec<String>,
    email_scopes: Vec<String>,
}

impl OAuth2Flow {
    #[must_use]
    pub fn new(provider_id: &str, config: OAuth2Config, api: Arc<dyn IdentityApi>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            exchange: Arc::new(config.clone()),
            config,
            api,
            allowed_orgs: Vec::new(),
            email_scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_allowed_orgs(mut self, orgs: Vec<String>) -> Self {
        self.allowed_orgs = orgs;
        self
    }

    /// Scopes that let the email endpoint be queried
    #[must_use]
    pub fn with_email_scopes(mut self, scopes: &[&str]) -> Self {
        self.email_scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_token_exchange(mut self, exchange: Arc<dyn TokenExchange>) -> Self {
        self.exchange = exchange;
        self
    }

    #[must_use]
    pub fn with_api(mut self, api: Arc<dyn IdentityApi>) -> Self {
        self.api = api;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    #[must_use]
    pub fn allowed_orgs(&self) -> &[String] {
        &self.allowed_orgs
    }

    /// Mint a verifier and build the redirect for `state`
    ///
    /// # Errors
    ///
    /// Returns `NoAuthUrl` if the authorization URL cannot be built
    pub fn begin(&self, state: &str) -> AuthResult<AuthIntent> {
        let pair = generate_pkce_pair();
        let auth_url = self.config.auth_code_url(state, &pair.code_challenge)?;
        LoggingHelper::log_login_started(&self.provider_id, state);
        Ok(AuthIntent::new(
            auth_url,
            state.to_string(),
            pair.code_verifier,
        ))
    }

    /// Finish the login and return the stored user
    ///
    /// `params` must carry `code` and the `code_verifier` from [`begin`](Self::begin);
    /// `state`, when present, is recorded on the account.
    ///
    /// # Errors
    ///
    /// - `AuthParseFailed` when `code` or `code_verifier` is missing
    /// - `Provider` when the provider rejects the exchange or a lookup
    /// - `NoVerifiedPrimaryEmail` when no usable email can be found
    /// - `NotAllowedOrg` when the user is outside every allowed org
    /// - any adapter error from storing the user
    pub async fn complete(
        &self,
        ctx: &Context,
        adapter: &dyn Adapter,
        params: &AuthParams,
    ) -> AuthResult<User> {
        let code = params.get("code").ok_or(AuthError::AuthParseFailed)?;
        let verifier = params
            .get(CODE_VERIFIER_PARAM)
            .ok_or(AuthError::AuthParseFailed)?;

        LoggingHelper::log_token_exchange_start(&self.provider_id);
        let token = self.exchange.exchange(ctx, code, verifier).await?;
        LoggingHelper::log_token_exchange_summary(
            &self.provider_id,
            token.refresh_token.as_ref(),
            token.token_type.as_ref(),
            token.scope.as_ref(),
        );

        let profile = self.api.fetch_profile(ctx, &token).await?;

        let (email, verified) = match profile.email.as_deref().filter(|e| !e.is_empty()) {
            Some(email) => (email.to_string(), None),
            None if self.can_read_emails(&token) => (self.resolve_email(ctx, &token).await?, Some(true)),
            None => return Err(AuthError::NoVerifiedPrimaryEmail),
        };

        if !self.allowed_orgs.is_empty() && !self.is_in_allowed_org(ctx, &token, &profile).await {
            return Err(AuthError::NotAllowedOrg);
        }

        let user = self.materialize(&token, &profile, email, verified, params.get("state"));
        let created = adapter.create_user(ctx, user).await?;
        adapter.get_user(ctx, created.id).await
    }

    /// Whether the token's scopes allow listing emails
    ///
    /// Falls back to the requested scopes when the provider did not report grants.
    #[must_use]
    pub fn can_read_emails(&self, token: &OAuth2Token) -> bool {
        let scopes = token
            .granted_scopes()
            .unwrap_or_else(|| self.config.scopes.clone());
        scopes
            .iter()
            .any(|s| self.email_scopes.iter().any(|e| e == s.trim()))
    }

    /// First primary and verified address across all pages
    ///
    /// # Errors
    ///
    /// Returns `NoVerifiedPrimaryEmail` if no page holds one, or the lookup error
    pub async fn resolve_email(&self, ctx: &Context, token: &OAuth2Token) -> AuthResult<String> {
        let mut page = 1;
        loop {
            let result = self.api.list_emails(ctx, token, page).await?;
            if let Some(entry) = result.emails.iter().find(|e| e.primary && e.verified) {
                return Ok(entry.email.clone());
            }
            match result.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        Err(AuthError::NoVerifiedPrimaryEmail)
    }

    async fn is_in_allowed_org(&self, ctx: &Context, token: &OAuth2Token, profile: &Profile) -> bool {
        let Some(login) = profile.login.as_deref().filter(|l| !l.is_empty()) else {
            warn!("{} profile has no login; cannot check org membership", self.provider_id);
            return false;
        };

        for org in &self.allowed_orgs {
            match self.api.is_org_member(ctx, token, org, login).await {
                Ok(true) => return true,
                Ok(false) => debug!("{login} is not a member of {org}"),
                Err(e) => warn!("Org membership check for {login} in {org} failed: {e}"),
            }
        }
        false
    }

    fn materialize(
        &self,
        token: &OAuth2Token,
        profile: &Profile,
        email: String,
        email_verified: Option<bool>,
        state: Option<&str>,
    ) -> User {
        let mut account = Account::new(AccountType::OAuth2, &self.provider_id, &profile.id);
        account.access_token = Some(token.access_token.clone());
        account.refresh_token.clone_from(&token.refresh_token);
        account.expires_at = token.expires_at;
        account.token_type.clone_from(&token.token_type);
        account.scope.clone_from(&token.scope);
        account.id_token.clone_from(&token.id_token);
        account.session_state = state.map(str::to_string);

        let name = profile
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| profile.login.clone())
            .unwrap_or_default();

        let mut user = User::new(&name, &email)
            .with_image(profile.image.clone())
            .with_account(account);
        user.email_verified = email_verified;
        user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use crate::testing::mock::{MockIdentityApi, MockTokenExchange};

    fn endpoint() -> Endpoint {
        Endpoint {
            auth_url: "https://idp.example.com/authorize".to_string(),
            token_url: "https://idp.example.com/token".to_string(),
            device_auth_url: None,
        }
    }

    fn config(scopes: &[&str]) -> OAuth2Config {
        OAuth2Config::new(
            "client-1",
            "secret-1",
            "https://app.example.com/auth/idp/callback",
            endpoint(),
            scopes.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    fn token(scope: Option<&str>) -> OAuth2Token {
        OAuth2Token {
            access_token: "access-1".to_string(),
            token_type: Some("bearer".to_string()),
            scope: scope.map(str::to_string),
            ..OAuth2Token::default()
        }
    }

    fn email(address: &str, primary: bool, verified: bool) -> EmailEntry {
        EmailEntry {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    fn flow(api: Arc<MockIdentityApi>, exchange: Arc<MockTokenExchange>, scopes: &[&str]) -> OAuth2Flow {
        OAuth2Flow::new("idp", config(scopes), api)
            .with_token_exchange(exchange)
            .with_email_scopes(&["user", "user:email"])
    }

    fn callback() -> AuthParams {
        AuthParams::new()
            .with("code", "code-1")
            .with("state", "state-1")
            .with(CODE_VERIFIER_PARAM, "verifier-1")
    }

    #[test]
    fn test_auth_url_carries_pkce_params() {
        let flow = OAuth2Flow::new(
            "idp",
            config(&["read:user", "user:email"]),
            Arc::new(MockIdentityApi::new(Profile::default())),
        );
        let intent = flow.begin("state-xyz").unwrap();
        let url = Url::parse(intent.auth_url().unwrap()).unwrap();
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/authorize");
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["redirect_uri"], "https://app.example.com/auth/idp/callback");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "read:user user:email");
        assert_eq!(query["state"], "state-xyz");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(
            query["code_challenge"],
            code_challenge_s256(&intent.code_verifier)
        );
        assert_eq!(intent.state, "state-xyz");
    }

    #[test]
    fn test_invalid_authorize_endpoint() {
        let mut cfg = config(&[]);
        cfg.endpoint.auth_url = "not a url".to_string();
        assert_eq!(cfg.auth_code_url("s", "c"), Err(AuthError::NoAuthUrl));
    }

    #[test]
    fn test_parse_token_body() {
        let token = parse_token_body(
            r#"{"access_token":"gho_1","token_type":"bearer","scope":"read:user,user:email","expires_in":3600}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "gho_1");
        assert_eq!(
            token.granted_scopes(),
            Some(vec!["read:user".to_string(), "user:email".to_string()])
        );
        assert!(token.expires_at.is_some());

        assert!(matches!(
            parse_token_body(r#"{"error":"bad_verification_code","error_description":"expired"}"#),
            Err(AuthError::Provider(msg)) if msg.contains("bad_verification_code")
        ));
        assert!(matches!(parse_token_body("{}"), Err(AuthError::Provider(_))));
        assert!(matches!(parse_token_body("<html>"), Err(AuthError::Provider(_))));
    }

    #[actix_web::test]
    async fn test_complete_requires_code_and_verifier() {
        let api = Arc::new(MockIdentityApi::new(Profile::default()));
        let exchange = Arc::new(MockTokenExchange::new(token(None)));
        let flow = flow(api, exchange.clone(), &[]);
        let adapter = MemoryAdapter::new();
        let ctx = Context::background();

        let no_code = AuthParams::new().with(CODE_VERIFIER_PARAM, "v");
        assert_eq!(
            flow.complete(&ctx, &adapter, &no_code).await,
            Err(AuthError::AuthParseFailed)
        );

        let no_verifier = AuthParams::new().with("code", "c");
        assert_eq!(
            flow.complete(&ctx, &adapter, &no_verifier).await,
            Err(AuthError::AuthParseFailed)
        );
        assert!(exchange.calls().is_empty());
    }

    #[actix_web::test]
    async fn test_complete_materializes_user_and_account() {
        let profile = Profile {
            id: "42".to_string(),
            login: Some("octocat".to_string()),
            name: Some("The Octocat".to_string()),
            email: Some("octo@example.com".to_string()),
            image: Some("https://avatars.example.com/42".to_string()),
        };
        let api = Arc::new(MockIdentityApi::new(profile));
        let exchange = Arc::new(MockTokenExchange::new(token(Some("read:user"))));
        let flow = flow(api, exchange.clone(), &["read:user"]);
        let adapter = MemoryAdapter::new();
        let ctx = Context::background();

        let user = flow.complete(&ctx, &adapter, &callback()).await.unwrap();

        assert_eq!(exchange.calls(), vec![("code-1".to_string(), "verifier-1".to_string())]);
        assert_eq!(user.email, "octo@example.com");
        assert_eq!(user.name, "The Octocat");
        assert_eq!(user.image.as_deref(), Some("https://avatars.example.com/42"));
        assert_eq!(user.accounts.len(), 1);
        let account = &user.accounts[0];
        assert_eq!(account.account_type, AccountType::OAuth2);
        assert_eq!(account.provider, "idp");
        assert_eq!(account.provider_account_id, "42");
        assert_eq!(account.access_token.as_deref(), Some("access-1"));
        assert_eq!(account.session_state.as_deref(), Some("state-1"));
        assert_eq!(account.user_id, Some(user.id));

        // a second login upserts instead of duplicating
        let again = flow.complete(&ctx, &adapter, &callback()).await.unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(again.accounts.len(), 1);
    }

    #[actix_web::test]
    async fn test_email_resolution_pages_until_primary_verified() {
        let api = Arc::new(
            MockIdentityApi::new(Profile {
                id: "7".to_string(),
                ..Profile::default()
            })
            .with_email_pages(vec![
                EmailPage {
                    emails: vec![email("a@x.com", false, true), email("b@x.com", true, false)],
                    next_page: Some(2),
                },
                EmailPage {
                    emails: vec![email("c@x.com", true, true)],
                    next_page: None,
                },
            ]),
        );
        let exchange = Arc::new(MockTokenExchange::new(token(Some("user:email"))));
        let flow = flow(api.clone(), exchange, &[]);
        let adapter = MemoryAdapter::new();

        let user = flow
            .complete(&Context::background(), &adapter, &callback())
            .await
            .unwrap();

        assert_eq!(user.email, "c@x.com");
        assert_eq!(user.email_verified, Some(true));
        assert_eq!(api.email_page_requests(), vec![1, 2]);
    }

    #[actix_web::test]
    async fn test_email_resolution_exhausted() {
        let api = Arc::new(
            MockIdentityApi::new(Profile::default()).with_email_pages(vec![EmailPage {
                emails: vec![email("a@x.com", true, false)],
                next_page: None,
            }]),
        );
        let exchange = Arc::new(MockTokenExchange::new(token(Some("user"))));
        let flow = flow(api, exchange, &[]);

        assert_eq!(
            flow.complete(&Context::background(), &MemoryAdapter::new(), &callback())
                .await,
            Err(AuthError::NoVerifiedPrimaryEmail)
        );
    }

    #[actix_web::test]
    async fn test_no_email_scope_skips_lookup() {
        let api = Arc::new(MockIdentityApi::new(Profile::default()).with_email_pages(vec![
            EmailPage {
                emails: vec![email("a@x.com", true, true)],
                next_page: None,
            },
        ]));
        let exchange = Arc::new(MockTokenExchange::new(token(Some("read:user"))));
        let flow = flow(api.clone(), exchange, &["user:email"]);

        assert_eq!(
            flow.complete(&Context::background(), &MemoryAdapter::new(), &callback())
                .await,
            Err(AuthError::NoVerifiedPrimaryEmail)
        );
        assert!(api.email_page_requests().is_empty());
    }

    #[test]
    fn test_requested_scopes_used_when_grant_unreported() {
        let api = Arc::new(MockIdentityApi::new(Profile::default()));
        let exchange = Arc::new(MockTokenExchange::new(token(None)));

        let with_email = flow(api.clone(), exchange.clone(), &["read:user", "user:email"]);
        assert!(with_email.can_read_emails(&token(None)));

        let without = flow(api, exchange, &["read:user"]);
        assert!(!without.can_read_emails(&token(None)));
        assert!(without.can_read_emails(&token(Some("read:user user"))));
    }

    fn org_profile() -> Profile {
        Profile {
            id: "9".to_string(),
            login: Some("octocat".to_string()),
            email: Some("octo@example.com".to_string()),
            ..Profile::default()
        }
    }

    #[actix_web::test]
    async fn test_org_allow_list_treats_errors_as_non_membership() {
        let api = Arc::new(
            MockIdentityApi::new(org_profile())
                .with_org("a", Err(AuthError::Provider("boom".to_string())))
                .with_org("b", Ok(true)),
        );
        let exchange = Arc::new(MockTokenExchange::new(token(None)));
        let flow = flow(api.clone(), exchange, &[])
            .with_allowed_orgs(vec!["a".to_string(), "b".to_string()]);

        let user = flow
            .complete(&Context::background(), &MemoryAdapter::new(), &callback())
            .await
            .unwrap();
        assert_eq!(user.email, "octo@example.com");
        assert_eq!(api.org_requests(), vec!["a".to_string(), "b".to_string()]);
    }

    #[actix_web::test]
    async fn test_org_allow_list_short_circuits() {
        let api = Arc::new(
            MockIdentityApi::new(org_profile())
                .with_org("a", Ok(true))
                .with_org("b", Ok(true)),
        );
        let exchange = Arc::new(MockTokenExchange::new(token(None)));
        let flow = flow(api.clone(), exchange, &[])
            .with_allowed_orgs(vec!["a".to_string(), "b".to_string()]);

        flow.complete(&Context::background(), &MemoryAdapter::new(), &callback())
            .await
            .unwrap();
        assert_eq!(api.org_requests(), vec!["a".to_string()]);
    }

    #[actix_web::test]
    async fn test_org_allow_list_rejects_outsider() {
        let api = Arc::new(MockIdentityApi::new(org_profile()).with_org("a", Ok(false)));
        let exchange = Arc::new(MockTokenExchange::new(token(None)));
        let flow = flow(api, exchange, &[]).with_allowed_orgs(vec!["a".to_string()]);
        let adapter = MemoryAdapter::new();

        assert_eq!(
            flow.complete(&Context::background(), &adapter, &callback())
                .await,
            Err(AuthError::NotAllowedOrg)
        );
        assert_eq!(adapter.account_count().unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_failed_lookup_on_only_org_rejects_login() {
        let api = Arc::new(
            MockIdentityApi::new(org_profile())
                .with_org("a", Err(AuthError::Provider("status=500".to_string()))),
        );
        let exchange = Arc::new(MockTokenExchange::new(token(None)));
        let flow = flow(api.clone(), exchange, &[]).with_allowed_orgs(vec!["a".to_string()]);
        let adapter = MemoryAdapter::new();

        assert_eq!(
            flow.complete(&Context::background(), &adapter, &callback())
                .await,
            Err(AuthError::NotAllowedOrg)
        );
        assert_eq!(api.org_requests(), vec!["a".to_string()]);
        assert_eq!(adapter.account_count().unwrap(), 0);
        assert_eq!(adapter.session_count().unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_exchange_failure_is_terminal() {
        let api = Arc::new(MockIdentityApi::new(org_profile()));
        let exchange = Arc::new(MockTokenExchange::failing(AuthError::Provider(
            "bad_verification_code".to_string(),
        )));
        let flow = flow(api, exchange.clone(), &[]);

        assert!(matches!(
            flow.complete(&Context::background(), &MemoryAdapter::new(), &callback())
                .await,
            Err(AuthError::Provider(_))
        ));
        assert_eq!(exchange.calls().len(), 1);
    }
}
