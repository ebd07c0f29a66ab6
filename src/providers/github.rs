use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::adapters::{Adapter, Context};
use crate::error::{AuthError, AuthResult};
use crate::models::User;
use crate::providers::oauth2::{
    EmailEntry, EmailPage, Endpoint, IdentityApi, OAuth2Config, OAuth2Flow, OAuth2Token, Profile,
    TokenExchange,
};
use crate::providers::{AuthIntent, AuthParams, Provider, ProviderType};

pub const GITHUB_ID: &str = "github";
pub const GITHUB_NAME: &str = "GitHub";

/// Always requested, extra configured scopes are appended
pub const DEFAULT_SCOPES: [&str; 2] = ["user:email", "read:user"];

/// Scopes granting access to `/user/emails`
pub const EMAIL_SCOPES: [&str; 2] = ["user", "user:email"];

const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const DEVICE_AUTH_URL: &str = "https://github.com/login/device/code";
const API_URL: &str = "https://api.github.com";

fn endpoints(enterprise_url: Option<&str>) -> (Endpoint, String) {
    match enterprise_url.map(|u| u.trim_end_matches('/')).filter(|u| !u.is_empty()) {
        Some(base) => (
            Endpoint {
                auth_url: format!("{base}/login/oauth/authorize"),
                token_url: format!("{base}/login/oauth/access_token"),
                device_auth_url: Some(format!("{base}/login/device/code")),
            },
            format!("{base}/api/v3"),
        ),
        None => (
            Endpoint {
                auth_url: AUTH_URL.to_string(),
                token_url: TOKEN_URL.to_string(),
                device_auth_url: Some(DEVICE_AUTH_URL.to_string()),
            },
            API_URL.to_string(),
        ),
    }
}

/// Page number of the `rel="next"` entry of a GitHub `Link` header
#[must_use]
pub fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == "rel=\"next\"") {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let url = Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

/// REST v3 client for the lookups made during login
///
/// Redirects are not followed, so the membership check sees GitHub's 302 for requesters
/// outside the organization.
pub struct GitHubApi {
    http: reqwest::Client,
    api_url: String,
}

impl GitHubApi {
    #[must_use]
    pub fn new(api_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build GitHub HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get(
        &self,
        ctx: &Context,
        token: &OAuth2Token,
        path: &str,
    ) -> AuthResult<reqwest::Response> {
        let url = format!("{}{path}", self.api_url);
        log::debug!("GitHub API request: GET {url}");

        ctx.run(async {
            self.http
                .get(&url)
                .header(AUTHORIZATION, format!("Bearer {}", token.access_token))
                .header(ACCEPT, "application/vnd.github+json")
                .header(USER_AGENT, concat!("authgate/", env!("CARGO_PKG_VERSION")))
                .send()
                .await
                .map_err(|e| AuthError::Provider(format!("GitHub request to {path} failed: {e}")))
        })
        .await
    }

    fn check_status(response: &reqwest::Response, path: &str) -> AuthResult<()> {
        if response.status().is_success() {
            return Ok(());
        }
        Err(AuthError::Provider(format!(
            "GitHub {path} returned status={}",
            response.status().as_u16()
        )))
    }
}

#[async_trait]
impl IdentityApi for GitHubApi {
    async fn fetch_profile(&self, ctx: &Context, token: &OAuth2Token) -> AuthResult<Profile> {
        let response = self.get(ctx, token, "/user").await?;
        Self::check_status(&response, "/user")?;

        let user = ctx
            .run(async move {
                response
                    .json::<GitHubUser>()
                    .await
                    .map_err(|e| AuthError::Provider(format!("Failed to parse GitHub user: {e}")))
            })
            .await?;

        Ok(Profile {
            id: user.id.to_string(),
            login: Some(user.login),
            name: user.name,
            email: user.email,
            image: user.avatar_url,
        })
    }

    async fn list_emails(
        &self,
        ctx: &Context,
        token: &OAuth2Token,
        page: u32,
    ) -> AuthResult<EmailPage> {
        let path = format!("/user/emails?page={page}");
        let response = self.get(ctx, token, &path).await?;
        Self::check_status(&response, "/user/emails")?;

        let next_page = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_from_link);

        let emails = ctx
            .run(async move {
                response
                    .json::<Vec<EmailEntry>>()
                    .await
                    .map_err(|e| AuthError::Provider(format!("Failed to parse GitHub emails: {e}")))
            })
            .await?;

        Ok(EmailPage { emails, next_page })
    }

    async fn is_org_member(
        &self,
        ctx: &Context,
        token: &OAuth2Token,
        org: &str,
        login: &str,
    ) -> AuthResult<bool> {
        let path = format!("/orgs/{org}/members/{login}");
        let response = self.get(ctx, token, &path).await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            // 302 means the requester cannot see the member list
            StatusCode::NOT_FOUND | StatusCode::FOUND => Ok(false),
            status => Err(AuthError::Provider(format!(
                "GitHub membership check returned status={}",
                status.as_u16()
            ))),
        }
    }
}

struct GitHubOptions {
    id: String,
    name: String,
    client_id: String,
    client_secret: String,
    callback_url: String,
    scopes: Vec<String>,
    allowed_orgs: Vec<String>,
    enterprise_url: Option<String>,
    api: Option<Arc<dyn IdentityApi>>,
    exchange: Option<Arc<dyn TokenExchange>>,
}

impl GitHubOptions {
    fn flow(&self) -> OAuth2Flow {
        let (endpoint, api_url) = endpoints(self.enterprise_url.as_deref());
        let config = OAuth2Config::new(
            &self.client_id,
            &self.client_secret,
            &self.callback_url,
            endpoint,
            self.scopes.clone(),
        );
        let api: Arc<dyn IdentityApi> = match &self.api {
            Some(api) => Arc::clone(api),
            None => Arc::new(GitHubApi::new(&api_url)),
        };

        let flow = OAuth2Flow::new(&self.id, config, api)
            .with_allowed_orgs(self.allowed_orgs.clone())
            .with_email_scopes(&EMAIL_SCOPES);
        match &self.exchange {
            Some(exchange) => flow.with_token_exchange(Arc::clone(exchange)),
            None => flow,
        }
    }
}

/// GitHub and GitHub Enterprise Server login
pub struct GitHubProvider {
    options: GitHubOptions,
    flow: OAuth2Flow,
}

impl GitHubProvider {
    #[must_use]
    pub fn new(client_id: &str, client_secret: &str, callback_url: &str) -> Self {
        let options = GitHubOptions {
            id: GITHUB_ID.to_string(),
            name: GITHUB_NAME.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            callback_url: callback_url.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            allowed_orgs: Vec::new(),
            enterprise_url: None,
            api: None,
            exchange: None,
        };
        let flow = options.flow();
        Self { options, flow }
    }

    /// Register under another id, e.g. a second GitHub Enterprise instance
    #[must_use]
    pub fn with_identity(mut self, id: &str, name: &str) -> Self {
        self.options.id = id.to_string();
        self.options.name = name.to_string();
        self.rebuild()
    }

    /// Request `scopes` in addition to [`DEFAULT_SCOPES`]
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[String]) -> Self {
        for scope in scopes {
            let scope = scope.trim();
            if !scope.is_empty() && !self.options.scopes.iter().any(|s| s == scope) {
                self.options.scopes.push(scope.to_string());
            }
        }
        self.rebuild()
    }

    /// Only admit members of at least one of `orgs`
    #[must_use]
    pub fn with_allowed_orgs(mut self, orgs: Vec<String>) -> Self {
        self.options.allowed_orgs = orgs;
        self.rebuild()
    }

    #[must_use]
    pub fn with_enterprise_url(mut self, url: &str) -> Self {
        self.options.enterprise_url = Some(url.to_string());
        self.rebuild()
    }

    #[must_use]
    pub fn with_api(mut self, api: Arc<dyn IdentityApi>) -> Self {
        self.options.api = Some(api);
        self.rebuild()
    }

    #[must_use]
    pub fn with_token_exchange(mut self, exchange: Arc<dyn TokenExchange>) -> Self {
        self.options.exchange = Some(exchange);
        self.rebuild()
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.options.scopes
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.flow.config().endpoint
    }

    fn rebuild(mut self) -> Self {
        self.flow = self.options.flow();
        self
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn id(&self) -> &str {
        &self.options.id
    }

    fn name(&self) -> &str {
        &self.options.name
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
