//! Pre-built test objects

use std::sync::Arc;

use crate::adapters::{Adapter, MemoryAdapter};
use crate::csrf::{CsrfConfig, CsrfGuard};
use crate::models::{Account, AccountType, User};
use crate::providers::github::GitHubProvider;
use crate::providers::oauth2::{OAuth2Token, Profile};
use crate::providers::{ProviderRegistry, SharedRegistry};
use crate::session::SessionManager;
use crate::settings::{ApplicationSettings, AuthgateSettings, CookieSettings, SessionSettings};

use super::constants::{
    TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_EMAIL, TEST_LOGIN, TEST_PROVIDER,
    TEST_PROVIDER_ACCOUNT_ID, TEST_REDIRECT_BASE_URL, TEST_SESSION_SECRET, TEST_USER_NAME,
};
use super::mock::{MockIdentityApi, MockTokenExchange};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// User with one linked GitHub account
    #[must_use]
    pub fn user() -> User {
        User::new(TEST_USER_NAME, TEST_EMAIL).with_account(Account::new(
            AccountType::OAuth2,
            TEST_PROVIDER,
            TEST_PROVIDER_ACCOUNT_ID,
        ))
    }

    #[must_use]
    pub fn settings() -> AuthgateSettings {
        AuthgateSettings {
            application: ApplicationSettings {
                redirect_base_url: TEST_REDIRECT_BASE_URL.to_string(),
                ..ApplicationSettings::default()
            },
            session: SessionSettings {
                session_duration_hours: 24,
                session_secret: String::from_utf8_lossy(TEST_SESSION_SECRET).into_owned(),
            },
            cookies: CookieSettings { secure: false },
            ..AuthgateSettings::default()
        }
    }

    /// Session manager over `adapter` with insecure cookies, for plain-http tests
    #[must_use]
    pub fn session_manager(adapter: Arc<dyn Adapter>) -> SessionManager {
        SessionManager::new(adapter, TEST_SESSION_SECRET, false, 24)
    }

    #[must_use]
    pub fn memory_session_manager() -> (Arc<MemoryAdapter>, SessionManager) {
        let adapter = Arc::new(MemoryAdapter::new());
        let manager = Self::session_manager(adapter.clone());
        (adapter, manager)
    }

    #[must_use]
    pub fn csrf_guard(sessions: SessionManager) -> CsrfGuard {
        CsrfGuard::new(CsrfConfig::default(), sessions)
    }

    /// Profile with a public email
    #[must_use]
    pub fn profile() -> Profile {
        Profile {
            id: TEST_PROVIDER_ACCOUNT_ID.to_string(),
            login: Some(TEST_LOGIN.to_string()),
            name: Some(TEST_USER_NAME.to_string()),
            email: Some(TEST_EMAIL.to_string()),
            image: None,
        }
    }

    /// Token as GitHub returns it, scopes comma separated
    #[must_use]
    pub fn token() -> OAuth2Token {
        OAuth2Token {
            access_token: "gho_test_access_token".to_string(),
            token_type: Some("bearer".to_string()),
            scope: Some("read:user,user:email".to_string()),
            ..OAuth2Token::default()
        }
    }

    #[must_use]
    pub fn token_exchange() -> Arc<MockTokenExchange> {
        Arc::new(MockTokenExchange::new(Self::token()))
    }

    #[must_use]
    pub fn identity_api() -> Arc<MockIdentityApi> {
        Arc::new(MockIdentityApi::new(Self::profile()))
    }

    /// GitHub provider wired to the given doubles
    #[must_use]
    pub fn github_provider(
        api: Arc<MockIdentityApi>,
        exchange: Arc<MockTokenExchange>,
    ) -> GitHubProvider {
        let callback = Self::settings().callback_url(TEST_PROVIDER);
        GitHubProvider::new(TEST_CLIENT_ID, TEST_CLIENT_SECRET, &callback)
            .with_api(api)
            .with_token_exchange(exchange)
    }

    #[must_use]
    pub fn registry(provider: GitHubProvider) -> SharedRegistry {
        SharedRegistry::new(ProviderRegistry::builder().register(Arc::new(provider)).build())
    }
}
