use actix_web::{cookie::Cookie, HttpRequest};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, Envelope, Versioned};
use crate::utils::crypto::{decrypt_data, encrypt_data};

/// Cookie carrying the encrypted session token
pub const SESSION_COOKIE: &str = "authgate_session";
/// Short-lived cookie carrying the PKCE verifier between redirect and callback
pub const PENDING_LOGIN_COOKIE: &str = "authgate_pending_login";

/// How long a started login may take before the callback is refused
pub const PENDING_LOGIN_MAX_AGE_MINUTES: i64 = 10;

/// Payload of the session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub session_token: String,
}

impl Versioned for SessionCookie {
    const KIND: &'static str = "session_cookie";
    const VERSION: u16 = 1;
}

/// Login started by `begin_auth` and not yet completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: String,
    pub provider: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

impl PendingLogin {
    #[must_use]
    pub fn new(state: String, provider: &str, code_verifier: String) -> Self {
        Self {
            state,
            provider: provider.to_string(),
            code_verifier,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        Utc::now() - self.created_at < Duration::minutes(PENDING_LOGIN_MAX_AGE_MINUTES)
    }
}

impl Versioned for PendingLogin {
    const KIND: &'static str = "pending_login";
    const VERSION: u16 = 1;
}

/// Options for cookie creation
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: actix_web::cookie::SameSite,
    pub path: String,
    pub max_age: actix_web::cookie::time::Duration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: actix_web::cookie::SameSite::Strict,
            path: "/".to_string(),
            max_age: actix_web::cookie::time::Duration::hours(24),
        }
    }
}

/// Builds and reads the encrypted cookies used by the login flow
///
/// Cookie values are AES-256-GCM encrypted versioned envelopes, so a cookie
/// written for one payload type can never be read back as another.
#[derive(Clone)]
pub struct CookieFactory {
    encryption_key: [u8; 32],
    cookie_secure: bool,
    session_duration_hours: u64,
}

impl CookieFactory {
    #[must_use]
    pub fn new(encryption_key: [u8; 32], cookie_secure: bool, session_duration_hours: u64) -> Self {
        Self {
            encryption_key,
            cookie_secure,
            session_duration_hours,
        }
    }

    #[must_use]
    pub const fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    /// Create a cookie holding an encrypted, versioned payload
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or encryption fails
    pub fn create_cookie<T: Versioned>(
        &self,
        name: &str,
        data: Option<&T>,
        options: CookieOptions,
    ) -> Result<Cookie<'static>> {
        let value = match data {
            Some(data) => encrypt_data(&codec::encode(data)?, &self.encryption_key)?,
            None => String::new(),
        };

        Ok(Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.cookie_secure && options.secure)
            .same_site(options.same_site)
            .path(options.path)
            .max_age(options.max_age)
            .finish())
    }

    /// Create the session cookie for a freshly issued session
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails or the session lifetime is out of range
    pub fn create_session_cookie(&self, session_token: &str) -> Result<Cookie<'static>> {
        let max_age_seconds = i64::try_from(self.session_duration_hours)
            .ok()
            .and_then(|hours| hours.checked_mul(3600))
            .ok_or_else(|| {
                anyhow!(
                    "Session lifetime of {} hours is out of range",
                    self.session_duration_hours
                )
            })?;
        self.create_cookie(
            SESSION_COOKIE,
            Some(&SessionCookie {
                session_token: session_token.to_string(),
            }),
            CookieOptions {
                same_site: actix_web::cookie::SameSite::Lax,
                max_age: actix_web::cookie::time::Duration::seconds(max_age_seconds),
                ..Default::default()
            },
        )
    }

    /// Create the pending-login cookie
    ///
    /// `SameSite=Lax` so the cookie survives the top-level redirect back from the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_pending_login_cookie(&self, pending: &PendingLogin) -> Result<Cookie<'static>> {
        let cookie = self.create_cookie(
            PENDING_LOGIN_COOKIE,
            Some(pending),
            CookieOptions {
                same_site: actix_web::cookie::SameSite::Lax,
                max_age: actix_web::cookie::time::Duration::minutes(PENDING_LOGIN_MAX_AGE_MINUTES),
                ..Default::default()
            },
        )?;

        log::debug!(
            "Creating pending login cookie: secure={}, provider={}, encrypted_len={}",
            self.cookie_secure,
            pending.provider,
            cookie.value().len()
        );

        Ok(cookie)
    }

    /// Create an expired cookie that clears `name` in the browser
    #[must_use]
    pub fn create_expired_cookie(&self, name: &str) -> Cookie<'static> {
        create_expired_cookie(name, self.cookie_secure)
    }

    /// Read and decrypt a cookie payload
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is absent, cannot be decrypted or holds another payload type
    pub fn read_cookie<T: Versioned>(&self, req: &HttpRequest, name: &str) -> Result<T> {
        let cookie = req
            .cookie(name)
            .ok_or_else(|| anyhow!("Cookie not found: {name}"))?;
        if cookie.value().is_empty() {
            return Err(anyhow!("Cookie is empty: {name}"));
        }
        let envelope = decrypt_data::<Envelope>(cookie.value(), &self.encryption_key)?;
        Ok(codec::decode(envelope)?)
    }

    /// Session token from the session cookie; unreadable cookies count as absent
    #[must_use]
    pub fn session_token_from_request(&self, req: &HttpRequest) -> Option<String> {
        match self.read_cookie::<SessionCookie>(req, SESSION_COOKIE) {
            Ok(cookie) => Some(cookie.session_token),
            Err(e) => {
                log::debug!("No usable session cookie: {e}");
                None
            }
        }
    }

    #[must_use]
    pub fn pending_login_from_request(&self, req: &HttpRequest) -> Option<PendingLogin> {
        match self.read_cookie::<PendingLogin>(req, PENDING_LOGIN_COOKIE) {
            Ok(pending) => Some(pending),
            Err(e) => {
                log::warn!("Failed to read pending login cookie: {e}");
                None
            }
        }
    }
}

/// Create an expired cookie to clear a specific cookie
#[must_use]
pub fn create_expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(true)
        .secure(secure)
        .same_site(actix_web::cookie::SameSite::Lax)
        .path("/")
        .max_age(actix_web::cookie::time::Duration::seconds(-1))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::constants::TEST_SESSION_SECRET;
    use crate::utils::crypto::derive_encryption_key;
    use actix_web::test::TestRequest;

    fn factory() -> CookieFactory {
        CookieFactory::new(derive_encryption_key(TEST_SESSION_SECRET), true, 24)
    }

    #[test]
    fn test_create_expired_cookie() {
        let cookie = create_expired_cookie("test_cookie", true);
        assert_eq!(cookie.name(), "test_cookie");
        assert_eq!(cookie.value(), "");
        assert!(cookie.http_only().unwrap());
        assert!(cookie.secure().unwrap());
        assert_eq!(cookie.path().unwrap(), "/");
        assert!(cookie.max_age().unwrap().whole_seconds() < 0);
    }

    #[test]
    fn test_session_cookie_is_encrypted_and_readable() {
        let factory = factory();
        let cookie = factory.create_session_cookie("session-token-1").unwrap();

        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert!(cookie.http_only().unwrap());
        assert!(!cookie.value().contains("session-token-1"));

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(
            factory.session_token_from_request(&req).as_deref(),
            Some("session-token-1")
        );
    }

    #[test]
    fn test_cookie_of_other_kind_is_rejected() {
        let factory = factory();
        let pending = PendingLogin::new("state".to_string(), "github", "verifier".to_string());
        let mut cookie = factory.create_pending_login_cookie(&pending).unwrap();
        cookie.set_name(SESSION_COOKIE);

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert!(factory.session_token_from_request(&req).is_none());
    }

    #[test]
    fn test_cookie_from_other_secret_is_rejected() {
        let other = CookieFactory::new(derive_encryption_key(b"another-secret"), true, 24);
        let cookie = other.create_session_cookie("session-token-1").unwrap();

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert!(factory().session_token_from_request(&req).is_none());
    }

    #[test]
    fn test_pending_login_freshness() {
        let mut pending = PendingLogin::new("s".to_string(), "github", "v".to_string());
        assert!(pending.is_fresh());
        pending.created_at = Utc::now() - Duration::minutes(PENDING_LOGIN_MAX_AGE_MINUTES + 1);
        assert!(!pending.is_fresh());
    }

    #[test]
    fn test_session_cookie_with_unrepresentable_lifetime() {
        let factory = CookieFactory::new(derive_encryption_key(TEST_SESSION_SECRET), true, u64::MAX);
        assert!(factory.create_session_cookie("t").is_err());
    }

    #[test]
    fn test_insecure_factory_drops_secure_flag() {
        let factory = CookieFactory::new(derive_encryption_key(TEST_SESSION_SECRET), false, 24);
        let cookie = factory.create_session_cookie("t").unwrap();
        assert_eq!(cookie.secure(), Some(false));
    }
}
