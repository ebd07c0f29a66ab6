// HTTP request handlers: login redirect, provider callback, session and CSRF demo routes
pub mod auth;
pub mod session;

use std::time::Duration;

use actix_web::web;

use crate::adapters::Context;

pub use auth::{begin_auth, complete_auth};
pub use session::{health, logout, protected, session_info, SessionView, UserView};

/// Upper bound on the storage and provider work done for one request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn request_context() -> Context {
    Context::background().with_timeout(REQUEST_TIMEOUT)
}

/// Register every route; expects `SessionManager`, `CsrfGuard` and `SharedRegistry` app data
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg.route("/login/{provider}", web::get().to(begin_auth))
        .route("/auth/{provider}/callback", web::get().to(complete_auth))
        .route("/session", web::get().to(session_info))
        .route("/logout", web::get().to(logout))
        .route("/protected", web::get().to(protected))
        .route("/protected", web::post().to(protected))
        .route("/ping", web::get().to(health));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_request_context_has_deadline() {
        let ctx = request_context();
        let deadline = ctx.deadline().unwrap();
        assert!(deadline > tokio::time::Instant::now());
        assert!(deadline <= tokio::time::Instant::now() + REQUEST_TIMEOUT);
        assert!(ctx.err().is_ok());
    }
}
