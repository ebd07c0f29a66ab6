//! Session-bound CSRF protection
//!
//! Each session carries exactly one token. A state-changing request must echo it
//! back; on success the guard swaps in a fresh token, so every token is good for one
//! request only. Rejections go through the configured error handler, which by default
//! answers a bare 403.

pub mod config;
pub mod extractor;
pub mod guard;

/// Default request header carrying the token
pub const HEADER_NAME: &str = "X-Csrf-Token";

pub use config::{CsrfConfig, ErrorHandler, TokenGenerator, DEFAULT_IDLE_TIMEOUT};
pub use extractor::{FormFields, TokenExtractor};
pub use guard::{token_from_request, CsrfGuard, CsrfOutcome};
