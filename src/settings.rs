use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::csrf::config::MAX_IDLE_TIMEOUT_MINUTES;
use crate::csrf::HEADER_NAME;
use crate::providers::github::GITHUB_NAME;
use crate::session::manager::MAX_SESSION_DURATION_HOURS;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthgateSettings {
    pub application: ApplicationSettings,
    pub session: SessionSettings,
    pub csrf: CsrfSettings,
    pub cookies: CookieSettings,
    pub logging: LoggingSettings,
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public base URL; provider callbacks are `{redirect_base_url}/auth/{id}/callback`
    pub redirect_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub session_duration_hours: u64,
    pub session_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfSettings {
    pub idle_timeout_minutes: u64,
    /// `source:name`, where source is one of header, param, form, query
    pub token_lookup: String,
    /// Omitted means the safe methods; an empty list checks every method
    pub ignored_methods: Option<Vec<String>>,
    /// Empty means no origin check
    pub trusted_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub id: String,
    pub display_name: Option<String>,
    /// `github` or `oauth2`
    pub kind: String,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    /// Extra scopes; GitHub always adds its defaults
    pub scopes: Vec<String>,
    pub allowed_orgs: Vec<String>,
    pub enterprise_url: Option<String>,

    // Endpoints for generic OAuth2 providers
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,

    pub enabled: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redirect_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_duration_hours: 24,
            session_secret: String::new(), // Will be generated if empty
        }
    }
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            token_lookup: format!("header:{HEADER_NAME}"),
            ignored_methods: None,
            trusted_origins: Vec::new(),
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true, // Default to secure cookies
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: None,
            kind: "oauth2".to_string(),
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            scopes: Vec::new(),
            allowed_orgs: Vec::new(),
            enterprise_url: None,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            enabled: true,
        }
    }
}

impl AuthgateSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// Priority, highest first:
    /// 1. Environment variables
    /// 2. Settings.toml in `AUTHGATE_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in the current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - A duration is out of range
    /// - Logger initialization fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        let secrets_dir = std::env::var("AUTHGATE_SECRETS_DIR").ok();
        let mut settings =
            Self::load_base_settings(Path::new("Settings.toml"), secrets_dir.as_deref().map(Path::new))?;

        Self::apply_env_overrides(&mut settings);
        settings.validate()?;
        Self::initialize_logging(&settings.logging)?;

        Ok(settings)
    }

    /// Reject durations that cannot be added to the current time
    ///
    /// # Errors
    ///
    /// Returns an error if the session lifetime or CSRF idle timeout exceeds its maximum
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.session.session_duration_hours > MAX_SESSION_DURATION_HOURS {
            return Err(format!(
                "session_duration_hours = {} exceeds the maximum of {MAX_SESSION_DURATION_HOURS}",
                self.session.session_duration_hours
            )
            .into());
        }
        if self.csrf.idle_timeout_minutes > MAX_IDLE_TIMEOUT_MINUTES {
            return Err(format!(
                "idle_timeout_minutes = {} exceeds the maximum of {MAX_IDLE_TIMEOUT_MINUTES}",
                self.csrf.idle_timeout_minutes
            )
            .into());
        }
        Ok(())
    }

    /// Initialize `env_logger`; `RUST_LOG` still wins over the configured level
    ///
    /// # Errors
    ///
    /// Returns an error if a logger is already installed
    fn initialize_logging(logging: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&logging.level))
            .try_init()?;
        Ok(())
    }

    /// Load base settings from `base_path`, replaced wholesale by `secrets_dir/Settings.toml`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    pub fn load_base_settings(
        base_path: &Path,
        secrets_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        if base_path.exists() {
            let toml_content = fs::read_to_string(base_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            println!("✓ Loaded base settings from {}", base_path.display());
        }

        if let Some(secrets_dir) = secrets_dir {
            let secrets_path = secrets_dir.join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml_content = fs::read_to_string(&secrets_path)?;
                settings = basic_toml::from_str(&secrets_toml_content)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ AUTHGATE_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_csrf_env_overrides(&mut settings.csrf);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(redirect_base_url) = std::env::var("REDIRECT_BASE_URL") {
            app_settings.redirect_base_url = redirect_base_url;
        }
    }

    /// Apply environment overrides for session settings
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        Self::apply_numeric_env_override(
            "SESSION_DURATION_HOURS",
            &mut session_settings.session_duration_hours,
        );
        Self::handle_session_secret_override(session_settings);
    }

    pub fn apply_csrf_env_overrides(csrf_settings: &mut CsrfSettings) {
        Self::apply_numeric_env_override(
            "CSRF_IDLE_TIMEOUT_MINUTES",
            &mut csrf_settings.idle_timeout_minutes,
        );
        if let Ok(header) = std::env::var("CSRF_HEADER_NAME") {
            if !header.trim().is_empty() {
                csrf_settings.token_lookup = format!("header:{}", header.trim());
            }
        }
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn handle_session_secret_override(session_settings: &mut SessionSettings) {
        let env_secret_set = std::env::var("SESSION_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                session_settings.session_secret = secret;
                true
            }
        });

        if !env_secret_set && session_settings.session_secret.is_empty() {
            session_settings.session_secret = Self::generate_random_session_secret();
            Self::warn_about_generated_secret();
        }
    }

    /// 32 bytes (256 bits) of entropy, base64 encoded
    fn generate_random_session_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated session secret");
        eprintln!("🔒 For production use, set the SESSION_SECRET environment variable");
        eprintln!("   or configure session_secret in Settings.toml");
        eprintln!("💡 Sessions will not survive a restart unless a secret is configured");
    }

    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                cookie_settings.secure = cookie_secure;
            }
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Callback URL registered with the provider `provider_id`
    #[must_use]
    pub fn callback_url(&self, provider_id: &str) -> String {
        format!(
            "{}/auth/{provider_id}/callback",
            self.application.redirect_base_url.trim_end_matches('/')
        )
    }

    #[must_use]
    pub fn get_enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }

    #[must_use]
    pub fn get_provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.id == id)
    }
}

impl ProviderSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        Self::resolve(self.client_id_env.as_deref(), self.client_id.as_ref())
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        Self::resolve(self.client_secret_env.as_deref(), self.client_secret.as_ref())
    }

    fn resolve(env_var: Option<&str>, direct: Option<&String>) -> Option<String> {
        if let Some(env_var) = env_var {
            if let Ok(value) = std::env::var(env_var) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        direct.filter(|v| !v.is_empty()).cloned()
    }

    /// Configured name, else the canonical name of the kind, else the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ if self.kind == "github" => GITHUB_NAME,
            _ => &self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env_vars() {
        std::env::remove_var("SESSION_SECRET");
        std::env::remove_var("SESSION_DURATION_HOURS");
        std::env::remove_var("CSRF_IDLE_TIMEOUT_MINUTES");
        std::env::remove_var("CSRF_HEADER_NAME");
        std::env::remove_var("AUTHGATE_SECRETS_DIR");
        std::env::remove_var("TEST_GITHUB_CLIENT_ID");
    }

    #[test]
    fn test_defaults() {
        let settings = AuthgateSettings::default();
        assert_eq!(settings.session.session_secret, "");
        assert_eq!(settings.session.session_duration_hours, 24);
        assert_eq!(settings.csrf.idle_timeout_minutes, 30);
        assert_eq!(settings.csrf.token_lookup, "header:X-Csrf-Token");
        assert!(settings.cookies.secure);
    }

    #[test]
    fn test_validate_rejects_out_of_range_durations() {
        assert!(AuthgateSettings::default().validate().is_ok());

        let mut settings = AuthgateSettings::default();
        settings.session.session_duration_hours = 3_000_000_000;
        assert!(settings.validate().is_err());

        let mut settings = AuthgateSettings::default();
        settings.csrf.idle_timeout_minutes = MAX_IDLE_TIMEOUT_MINUTES + 1;
        assert!(settings.validate().is_err());

        let mut settings = AuthgateSettings::default();
        settings.session.session_duration_hours = MAX_SESSION_DURATION_HOURS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_with_providers() {
        let toml = r#"
            [application]
            redirect_base_url = "https://auth.example.com/"

            [csrf]
            trusted_origins = ["https://app.example.com"]

            [[providers]]
            id = "github"
            kind = "github"
            client_id = "abc"
            allowed_orgs = ["acme"]

            [[providers]]
            id = "corp"
            enabled = false
        "#;
        let settings: AuthgateSettings = basic_toml::from_str(toml).unwrap();

        assert_eq!(settings.application.port, 8080);
        assert_eq!(settings.csrf.idle_timeout_minutes, 30);
        assert_eq!(settings.providers.len(), 2);
        assert_eq!(settings.get_enabled_providers().len(), 1);
        assert_eq!(settings.get_provider("github").unwrap().allowed_orgs, vec!["acme"]);
        assert_eq!(settings.get_provider("corp").unwrap().kind, "oauth2");
        assert_eq!(
            settings.callback_url("github"),
            "https://auth.example.com/auth/github/callback"
        );
    }

    #[test]
    #[serial]
    fn test_session_secret_env_override() {
        clean_env_vars();

        let mut session_settings = SessionSettings {
            session_duration_hours: 24,
            session_secret: "default-secret".to_string(),
        };

        std::env::set_var("SESSION_SECRET", "env-override-secret");
        AuthgateSettings::apply_session_env_overrides(&mut session_settings);
        assert_eq!(session_settings.session_secret, "env-override-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_session_duration_env_override() {
        clean_env_vars();

        let mut session_settings = SessionSettings {
            session_duration_hours: 24,
            session_secret: "test-secret".to_string(),
        };

        std::env::set_var("SESSION_DURATION_HOURS", "48");
        AuthgateSettings::apply_session_env_overrides(&mut session_settings);

        assert_eq!(session_settings.session_duration_hours, 48);
        assert_eq!(session_settings.session_secret, "test-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_session_secret_auto_generation() {
        clean_env_vars();

        let mut first = SessionSettings {
            session_duration_hours: 24,
            session_secret: String::new(),
        };
        AuthgateSettings::apply_session_env_overrides(&mut first);
        assert!(first.session_secret.len() > 40);

        let mut second = SessionSettings {
            session_duration_hours: 24,
            session_secret: String::new(),
        };
        AuthgateSettings::apply_session_env_overrides(&mut second);
        assert_ne!(first.session_secret, second.session_secret);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_csrf_env_overrides() {
        clean_env_vars();

        let mut csrf = CsrfSettings::default();
        std::env::set_var("CSRF_IDLE_TIMEOUT_MINUTES", "5");
        std::env::set_var("CSRF_HEADER_NAME", "X-Xsrf");
        AuthgateSettings::apply_csrf_env_overrides(&mut csrf);

        assert_eq!(csrf.idle_timeout_minutes, 5);
        assert_eq!(csrf.token_lookup, "header:X-Xsrf");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_secrets_dir_replaces_base_settings() {
        clean_env_vars();
        let base_dir = tempfile::tempdir().unwrap();
        let secrets_dir = tempfile::tempdir().unwrap();

        let base_path = base_dir.path().join("Settings.toml");
        fs::write(&base_path, "[session]\nsession_secret = \"root-secret\"\n").unwrap();
        fs::write(
            secrets_dir.path().join("Settings.toml"),
            "[session]\nsession_secret = \"secrets-secret\"\n",
        )
        .unwrap();

        let root_only = AuthgateSettings::load_base_settings(&base_path, None).unwrap();
        assert_eq!(root_only.session.session_secret, "root-secret");

        let layered =
            AuthgateSettings::load_base_settings(&base_path, Some(secrets_dir.path())).unwrap();
        assert_eq!(layered.session.session_secret, "secrets-secret");

        let mut with_env = layered.clone();
        std::env::set_var("SESSION_SECRET", "env-secret");
        AuthgateSettings::apply_env_overrides(&mut with_env);
        assert_eq!(with_env.session.session_secret, "env-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_client_id_env_takes_precedence() {
        clean_env_vars();
        let provider = ProviderSettings {
            id: "github".to_string(),
            client_id: Some("from-file".to_string()),
            client_id_env: Some("TEST_GITHUB_CLIENT_ID".to_string()),
            ..ProviderSettings::default()
        };
        assert_eq!(provider.get_client_id().as_deref(), Some("from-file"));

        std::env::set_var("TEST_GITHUB_CLIENT_ID", "from-env");
        assert_eq!(provider.get_client_id().as_deref(), Some("from-env"));
        assert_eq!(provider.get_client_secret(), None);
        assert_eq!(provider.display_name(), "github");

        let github = ProviderSettings {
            kind: "github".to_string(),
            ..provider
        };
        assert_eq!(github.display_name(), "GitHub");

        clean_env_vars();
    }
}
