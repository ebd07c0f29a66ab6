//! Scripted doubles for the provider seams
//!
//! Each mock records the calls it receives so tests can assert on paging and
//! short-circuit behavior.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::adapters::Context;
use crate::error::{AuthError, AuthResult};
use crate::providers::oauth2::{EmailPage, IdentityApi, OAuth2Token, Profile, TokenExchange};

fn record<T>(log: &Mutex<Vec<T>>, entry: T) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
}

fn snapshot<T: Clone>(log: &Mutex<Vec<T>>) -> Vec<T> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Identity API answering from fixed data
pub struct MockIdentityApi {
    profile: AuthResult<Profile>,
    email_pages: Vec<EmailPage>,
    orgs: HashMap<String, AuthResult<bool>>,
    page_requests: Mutex<Vec<u32>>,
    org_requests: Mutex<Vec<String>>,
}

impl MockIdentityApi {
    #[must_use]
    pub fn new(profile: Profile) -> Self {
        Self {
            profile: Ok(profile),
            email_pages: Vec::new(),
            orgs: HashMap::new(),
            page_requests: Mutex::new(Vec::new()),
            org_requests: Mutex::new(Vec::new()),
        }
    }

    /// Profile lookups fail with `error`
    #[must_use]
    pub fn failing(error: AuthError) -> Self {
        Self {
            profile: Err(error),
            ..Self::new(Profile::default())
        }
    }

    /// Pages served by `list_emails`, page `n` being `pages[n - 1]`
    #[must_use]
    pub fn with_email_pages(mut self, pages: Vec<EmailPage>) -> Self {
        self.email_pages = pages;
        self
    }

    /// Answer for membership of `org`; unlisted orgs answer `Ok(false)`
    #[must_use]
    pub fn with_org(mut self, org: &str, result: AuthResult<bool>) -> Self {
        self.orgs.insert(org.to_string(), result);
        self
    }

    #[must_use]
    pub fn email_page_requests(&self) -> Vec<u32> {
        snapshot(&self.page_requests)
    }

    #[must_use]
    pub fn org_requests(&self) -> Vec<String> {
        snapshot(&self.org_requests)
    }
}

#[async_trait]
impl IdentityApi for MockIdentityApi {
    async fn fetch_profile(&self, ctx: &Context, _token: &OAuth2Token) -> AuthResult<Profile> {
        ctx.err()?;
        self.profile.clone()
    }

    async fn list_emails(
        &self,
        ctx: &Context,
        _token: &OAuth2Token,
        page: u32,
    ) -> AuthResult<EmailPage> {
        ctx.err()?;
        record(&self.page_requests, page);
        let index = usize::try_from(page.saturating_sub(1)).unwrap_or(usize::MAX);
        Ok(self.email_pages.get(index).cloned().unwrap_or_default())
    }

    async fn is_org_member(
        &self,
        ctx: &Context,
        _token: &OAuth2Token,
        org: &str,
        _login: &str,
    ) -> AuthResult<bool> {
        ctx.err()?;
        record(&self.org_requests, org.to_string());
        self.orgs.get(org).cloned().unwrap_or(Ok(false))
    }
}

/// Token endpoint returning a fixed result
pub struct MockTokenExchange {
    result: AuthResult<OAuth2Token>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockTokenExchange {
    #[must_use]
    pub fn new(token: OAuth2Token) -> Self {
        Self {
            result: Ok(token),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(error: AuthError) -> Self {
        Self {
            result: Err(error),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(code, code_verifier)` of every exchange
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        snapshot(&self.calls)
    }
}

#[async_trait]
impl TokenExchange for MockTokenExchange {
    async fn exchange(
        &self,
        ctx: &Context,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<OAuth2Token> {
        ctx.err()?;
        record(&self.calls, (code.to_string(), code_verifier.to_string()));
        self.result.clone()
    }
}
