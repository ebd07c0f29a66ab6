// Session handlers: inspect, end, and the CSRF-protected demo route
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::request_context;
use crate::csrf::{CsrfGuard, CsrfOutcome, FormFields, HEADER_NAME};
use crate::error::AuthError;
use crate::models::{Session, User};
use crate::session::cookie::SESSION_COOKIE;
use crate::session::{session_from_request, SessionManager};
use crate::utils::logging::LoggingHelper;
use crate::VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            image: user.image.clone(),
        }
    }
}

/// What a client may know about its session; the session token itself is never echoed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Token to send in the CSRF header with the next state-changing request
    pub csrf_token: String,
    pub csrf_expires_at: DateTime<Utc>,
    pub user: Option<UserView>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id,
            expires_at: session.expires_at,
            csrf_token: session.csrf_token.token.clone(),
            csrf_expires_at: session.csrf_token.expires_at,
            user: session.user.as_deref().map(UserView::from),
        }
    }
}

/// Current session
///
/// # Errors
///
/// `MissingSession` without a live session
pub async fn session_info(
    req: HttpRequest,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AuthError> {
    let ctx = request_context();
    let session = sessions.load_request_session(&ctx, &req).await?;
    Ok(HttpResponse::Ok().json(SessionView::from(&session)))
}

/// End the session behind the cookie and clear the cookie
///
/// Succeeds without a session, so a stale cookie can always be cleared.
pub async fn logout(req: HttpRequest, sessions: web::Data<SessionManager>) -> HttpResponse {
    let factory = sessions.cookie_factory();
    if let Some(token) = factory.session_token_from_request(&req) {
        let ctx = request_context();
        match sessions.delete_session(&ctx, &token).await {
            Ok(()) => LoggingHelper::log_session_ended(&token),
            Err(e) => warn!("Failed to delete session on logout: {e}"),
        }
    }

    HttpResponse::Found()
        .cookie(factory.create_expired_cookie(SESSION_COOKIE))
        .append_header((header::LOCATION, "/"))
        .finish()
}

/// CSRF-protected route; answers with the token to use next
///
/// Rejections, including a missing session, are rendered by the guard's error handler.
pub async fn protected(
    req: HttpRequest,
    form: Option<web::Form<FormFields>>,
    sessions: web::Data<SessionManager>,
    guard: web::Data<CsrfGuard>,
) -> HttpResponse {
    let ctx = request_context();
    if let Err(e) = sessions.load_request_session(&ctx, &req).await {
        debug!("No session for {} {}: {e}", req.method(), req.path());
    }

    let form = form.map(web::Form::into_inner);
    let outcome = match guard.protect(&ctx, &req, form.as_ref()).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };

    let Ok(session) = session_from_request(&req) else {
        // Bypassed requests may have no session at all
        return HttpResponse::Ok().json(json!({ "method": req.method().as_str() }));
    };

    HttpResponse::Ok()
        .insert_header((HEADER_NAME, session.csrf_token.token.clone()))
        .json(json!({
            "method": req.method().as_str(),
            "rotated": matches!(outcome, CsrfOutcome::Rotated(_)),
            "csrf_token": session.csrf_token.token,
        }))
}

/// Liveness probe
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok", "version": VERSION }))
}
