use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::Method, HttpRequest, HttpResponse};
use anyhow::{anyhow, Result};

use super::extractor::TokenExtractor;
use crate::error::AuthError;
use crate::settings::CsrfSettings;
use crate::utils::crypto::generate_csrf_token;

/// Default lifetime of a rotated CSRF token
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Longest idle timeout accepted from settings (one year)
pub const MAX_IDLE_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;

pub type BypassFn = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&HttpRequest, &AuthError) -> HttpResponse + Send + Sync>;
pub type TokenGenerator = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Behaviour of the CSRF guard
#[derive(Clone)]
pub struct CsrfConfig {
    pub next: Option<BypassFn>,
    pub ignored_methods: Vec<Method>,
    pub error_handler: ErrorHandler,
    pub extractor: TokenExtractor,
    pub trusted_origins: Vec<String>,
    pub idle_timeout: Duration,
    pub token_generator: TokenGenerator,
}

/// Every failure becomes a bare 403 so clients cannot tell which check failed
#[must_use]
pub fn default_error_handler() -> ErrorHandler {
    Arc::new(|_req: &HttpRequest, _err: &AuthError| HttpResponse::Forbidden().finish())
}

#[must_use]
pub fn default_token_generator() -> TokenGenerator {
    Arc::new(|| Ok(generate_csrf_token()))
}

#[must_use]
pub fn default_ignored_methods() -> Vec<Method> {
    vec![Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE]
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            next: None,
            ignored_methods: default_ignored_methods(),
            error_handler: default_error_handler(),
            extractor: TokenExtractor::default(),
            trusted_origins: Vec::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            token_generator: default_token_generator(),
        }
    }
}

impl CsrfConfig {
    /// Build the guard configuration from settings
    ///
    /// # Errors
    ///
    /// Returns an error if the token lookup or an ignored method cannot be parsed, or
    /// the idle timeout exceeds [`MAX_IDLE_TIMEOUT_MINUTES`]
    pub fn from_settings(settings: &CsrfSettings) -> Result<Self> {
        if settings.idle_timeout_minutes > MAX_IDLE_TIMEOUT_MINUTES {
            return Err(anyhow!(
                "CSRF idle timeout of {} minutes exceeds the maximum of {MAX_IDLE_TIMEOUT_MINUTES}",
                settings.idle_timeout_minutes
            ));
        }

        let mut config = Self::default()
            .with_extractor(TokenExtractor::from_lookup(&settings.token_lookup)?);

        // Omitted key keeps the safe methods; an explicit empty list guards everything
        if let Some(methods) = &settings.ignored_methods {
            let methods = methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                        .map_err(|e| anyhow!("Invalid ignored method '{m}': {e}"))
                })
                .collect::<Result<Vec<_>>>()?;
            config = config.with_ignored_methods(methods);
        }

        let config = config
            .with_trusted_origins(settings.trusted_origins.clone())
            .with_idle_timeout(Duration::from_secs(settings.idle_timeout_minutes.saturating_mul(60)));

        Ok(config)
    }

    #[must_use]
    pub fn with_next(mut self, next: BypassFn) -> Self {
        self.next = Some(next);
        self
    }

    /// Replace the ignored methods; an empty list checks every method
    #[must_use]
    pub fn with_ignored_methods(mut self, methods: Vec<Method>) -> Self {
        self.ignored_methods = methods;
        self
    }

    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: TokenExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn with_trusted_origins(mut self, origins: Vec<String>) -> Self {
        self.trusted_origins = origins
            .into_iter()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        self
    }

    /// A zero timeout keeps the default
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        if !idle_timeout.is_zero() {
            self.idle_timeout = idle_timeout;
        }
        self
    }

    #[must_use]
    pub fn with_token_generator(mut self, generator: TokenGenerator) -> Self {
        self.token_generator = generator;
        self
    }

    #[must_use]
    pub fn is_ignored(&self, method: &Method) -> bool {
        self.ignored_methods.contains(method)
    }

    /// Whether `origin` may issue state-changing requests; an empty list trusts everyone
    #[must_use]
    pub fn is_trusted_origin(&self, origin: &str) -> bool {
        self.trusted_origins.is_empty()
            || self
                .trusted_origins
                .iter()
                .any(|o| o.eq_ignore_ascii_case(origin.trim_end_matches('/')))
    }
}

impl fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("next", &self.next.is_some())
            .field("ignored_methods", &self.ignored_methods)
            .field("extractor", &self.extractor)
            .field("trusted_origins", &self.trusted_origins)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}
