#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Session, CSRF and OAuth2/PKCE authentication for actix-web services
//!
//! Sessions and CSRF tokens live behind the [`Adapter`] storage contract. Identity
//! providers implement [`Provider`]; [`GitHubProvider`] and the generic
//! [`OAuth2Provider`] share the PKCE flow in [`providers::oauth2`].

/// Version of the authgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod adapters;
pub mod codec;
pub mod csrf;
pub mod error;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod session;
pub mod settings;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use adapters::{Adapter, Context, MemoryAdapter, UnimplementedAdapter};
pub use csrf::{CsrfConfig, CsrfGuard};
pub use error::{AuthError, AuthResult};
pub use handlers::configure_services;
pub use models::{Account, AccountType, CsrfToken, Session, User, VerificationToken};
pub use providers::{
    GitHubProvider, OAuth2Provider, Provider, ProviderRegistry, ProviderType, SharedRegistry,
};
pub use session::SessionManager;
pub use settings::AuthgateSettings;
