//! Test fixtures and mocks for authgate
//!
//! Available to unit tests and, with the `testing` feature, to integration tests.
//!
//! - [`fixtures`] - pre-built users, settings, managers and providers
//! - [`mock`] - scripted [`IdentityApi`](crate::providers::oauth2::IdentityApi) and
//!   [`TokenExchange`](crate::providers::oauth2::TokenExchange) doubles
//!
//! ```ignore
//! use std::sync::Arc;
//! use authgate::testing::{fixtures::TestFixtures, mock::MockIdentityApi};
//!
//! let api = Arc::new(MockIdentityApi::new(TestFixtures::profile()));
//! let provider = TestFixtures::github_provider(api, TestFixtures::token_exchange());
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::TestFixtures;

/// Common test constants
pub mod constants {
    /// Default test email address
    pub const TEST_EMAIL: &str = "test@example.com";

    /// Default test user name
    pub const TEST_USER_NAME: &str = "Test User";

    /// Provider-side account id of the test user
    pub const TEST_PROVIDER_ACCOUNT_ID: &str = "123456789";

    pub const TEST_LOGIN: &str = "testuser";

    pub const TEST_PROVIDER: &str = "github";

    pub const TEST_CLIENT_ID: &str = "test-client-id";

    pub const TEST_CLIENT_SECRET: &str = "test-client-secret";

    pub const TEST_REDIRECT_BASE_URL: &str = "http://localhost:8080";

    /// Session secret used for cookie encryption in tests
    pub const TEST_SESSION_SECRET: &[u8] = b"test_session_secret_32_bytes_long_";

    pub const TEST_TRUSTED_ORIGIN: &str = "https://app.example.com";
}
