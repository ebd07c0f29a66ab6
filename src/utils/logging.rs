// Centralized log lines for the login and CSRF flows
use log::{debug, info, warn};

use crate::error::AuthError;
use crate::utils::crypto::mask_token;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log provider registry initialization start
    pub fn log_provider_initialization() {
        info!("🔧 Initializing identity providers from configuration...");
    }

    pub fn log_provider_disabled(provider_id: &str) {
        info!("⏭️  Provider {provider_id} is disabled, skipping");
    }

    pub fn log_provider_registered(display_name: &str, provider_id: &str) {
        info!("✅ {display_name} provider registered ({provider_id})");
    }

    pub fn log_provider_not_configured(provider_id: &str, reason: &str) {
        warn!("❌ Provider {provider_id} not configured: {reason}");
    }

    /// Log summary of registered providers
    pub fn log_providers_summary(provider_ids: &[&str]) {
        info!("🎯 Registered identity providers: {provider_ids:?}");
    }

    pub fn log_login_started(provider_id: &str, state: &str) {
        info!(
            "🔍 Starting {provider_id} login (state: {})",
            mask_token(state)
        );
    }

    /// Log token exchange start
    pub fn log_token_exchange_start(provider_id: &str) {
        info!("🔄 Exchanging authorization code for tokens with {provider_id}");
    }

    pub fn log_token_exchange_summary(
        provider_id: &str,
        refresh_token: Option<&String>,
        token_type: Option<&String>,
        scope: Option<&String>,
    ) {
        info!(
            "🔍 Token exchange summary for {provider_id}: refresh_token={}, token_type={:?}, scope={:?}",
            refresh_token.map_or("missing", |_| "present"),
            token_type,
            scope
        );
    }

    pub fn log_login_failed(provider_id: &str, error: &AuthError) {
        warn!("Login with {provider_id} failed: {error}");
    }

    /// Log session creation success
    pub fn log_session_created(user_email: &str, provider_id: &str) {
        info!("Successfully created session for user: {user_email} (provider: {provider_id})");
    }

    pub fn log_session_ended(session_token: &str) {
        info!("Session {} ended", mask_token(session_token));
    }

    pub fn log_csrf_rejected(method: &str, path: &str, error: &AuthError) {
        warn!("CSRF check rejected {method} {path}: {error}");
    }

    pub fn log_csrf_rotated(session_token: &str) {
        debug!("Rotated CSRF token for session {}", mask_token(session_token));
    }
}
