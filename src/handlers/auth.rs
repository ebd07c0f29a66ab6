// Login handlers: redirect to the provider and finish the login on callback
use actix_web::{http::header, web, HttpRequest, HttpResponse, ResponseError};
use log::{error, warn};

use super::request_context;
use crate::error::{AuthError, AuthResult};
use crate::providers::oauth2::CODE_VERIFIER_PARAM;
use crate::providers::{AuthParams, SharedRegistry};
use crate::session::cookie::{PendingLogin, PENDING_LOGIN_COOKIE};
use crate::session::SessionManager;
use crate::utils::crypto::{constant_time_eq, generate_nonce};
use crate::utils::logging::LoggingHelper;

/// Random bytes behind the `state` parameter
const STATE_BYTES: usize = 32;

/// Start a login with `provider`
///
/// Mints the `state`, asks the provider for its authorization URL and remembers the
/// PKCE verifier in an encrypted pending-login cookie.
///
/// # Errors
///
/// `UnknownProvider` for an unregistered provider, or whatever the provider reports
pub async fn begin_auth(
    req: HttpRequest,
    path: web::Path<String>,
    registry: web::Data<SharedRegistry>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AuthError> {
    let provider_id = path.into_inner();
    let provider = registry.snapshot().get(&provider_id)?;

    let state = generate_nonce(STATE_BYTES);
    let params = AuthParams::from_query(req.query_string());
    let ctx = request_context();

    let intent = provider
        .begin_auth(&ctx, sessions.adapter().as_ref(), &state, &params)
        .await
        .inspect_err(|e| LoggingHelper::log_login_failed(&provider_id, e))?;
    let auth_url = intent.auth_url()?;

    let pending = PendingLogin::new(intent.state.clone(), &provider_id, intent.code_verifier.clone());
    let cookie = sessions
        .cookie_factory()
        .create_pending_login_cookie(&pending)
        .map_err(|e| {
            error!("Failed to create pending login cookie for {provider_id}: {e}");
            AuthError::BadSession
        })?;

    Ok(HttpResponse::Found()
        .cookie(cookie)
        .append_header((header::LOCATION, auth_url))
        .finish())
}

/// Provider callback: verify `state`, complete the login and issue a session
///
/// The pending-login cookie is cleared whatever the outcome. Failures are answered
/// with the error's status and JSON body.
pub async fn complete_auth(
    req: HttpRequest,
    path: web::Path<String>,
    registry: web::Data<SharedRegistry>,
    sessions: web::Data<SessionManager>,
) -> HttpResponse {
    let provider_id = path.into_inner();
    let clear_pending = sessions
        .cookie_factory()
        .create_expired_cookie(PENDING_LOGIN_COOKIE);

    match finish_login(&req, &provider_id, &registry, &sessions).await {
        Ok(session_cookie) => HttpResponse::Found()
            .cookie(session_cookie)
            .cookie(clear_pending)
            .append_header((header::LOCATION, "/"))
            .finish(),
        Err(err) => {
            LoggingHelper::log_login_failed(&provider_id, &err);
            let mut response = err.error_response();
            if let Err(e) = response.add_cookie(&clear_pending) {
                warn!("Failed to clear pending login cookie: {e}");
            }
            response
        }
    }
}

async fn finish_login(
    req: &HttpRequest,
    provider_id: &str,
    registry: &SharedRegistry,
    sessions: &SessionManager,
) -> AuthResult<actix_web::cookie::Cookie<'static>> {
    let provider = registry.snapshot().get(provider_id)?;
    let mut params = AuthParams::from_query(req.query_string());

    if let Some(error) = params.get("error") {
        let detail = params.get("error_description").unwrap_or_default();
        return Err(AuthError::Provider(format!("authorization denied: {error} {detail}")));
    }

    let factory = sessions.cookie_factory();
    let pending = factory
        .pending_login_from_request(req)
        .ok_or(AuthError::StateMismatch)?;
    verify_pending_login(&pending, provider_id, params.get("state"))?;
    params.insert(CODE_VERIFIER_PARAM, pending.code_verifier);

    let ctx = request_context();
    let user = provider
        .complete_auth(&ctx, sessions.adapter().as_ref(), &params)
        .await?;
    let session = sessions.create_session(&ctx, user.id, None).await?;
    LoggingHelper::log_session_created(&user.email, provider_id);

    factory
        .create_session_cookie(&session.session_token)
        .map_err(|e| {
            error!("Failed to create session cookie: {e}");
            AuthError::BadSession
        })
}

/// The callback belongs to the login remembered in `pending`
///
/// # Errors
///
/// Returns `StateMismatch` for a missing or different `state`, another provider, or a
/// login older than the pending-login lifetime
pub fn verify_pending_login(
    pending: &PendingLogin,
    provider_id: &str,
    state: Option<&str>,
) -> AuthResult<()> {
    let state = state.ok_or(AuthError::StateMismatch)?;
    if pending.provider != provider_id || !constant_time_eq(state, &pending.state) {
        return Err(AuthError::StateMismatch);
    }
    if !pending.is_fresh() {
        return Err(AuthError::StateMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn pending() -> PendingLogin {
        PendingLogin::new("state-1".to_string(), "github", "verifier".to_string())
    }

    #[test]
    fn test_matching_pending_login() {
        assert_eq!(verify_pending_login(&pending(), "github", Some("state-1")), Ok(()));
    }

    #[test]
    fn test_state_mismatch_cases() {
        assert_eq!(
            verify_pending_login(&pending(), "github", None),
            Err(AuthError::StateMismatch)
        );
        assert_eq!(
            verify_pending_login(&pending(), "github", Some("state-2")),
            Err(AuthError::StateMismatch)
        );
        assert_eq!(
            verify_pending_login(&pending(), "gitea", Some("state-1")),
            Err(AuthError::StateMismatch)
        );

        let mut stale = pending();
        stale.created_at = Utc::now() - Duration::minutes(30);
        assert_eq!(
            verify_pending_login(&stale, "github", Some("state-1")),
            Err(AuthError::StateMismatch)
        );
    }
}
