#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use authgate::{
    configure_services, csrf::HEADER_NAME, AuthgateSettings, CsrfConfig, CsrfGuard, MemoryAdapter,
    ProviderRegistry, SessionManager, SharedRegistry,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = AuthgateSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let registry = ProviderRegistry::from_settings(&settings);
    if registry.is_empty() {
        log::warn!("No identity providers registered; /login will answer 404");
    }

    start_server(registry, settings).await
}

/// Start the server with in-memory storage
///
/// # Errors
///
/// Returns an error if:
/// - The CSRF settings are invalid
/// - Server binding fails
/// - Server fails to start
async fn start_server(registry: ProviderRegistry, settings: AuthgateSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings, &registry);

    let sessions = SessionManager::new(
        Arc::new(MemoryAdapter::new()),
        settings.session.session_secret.as_bytes(),
        settings.cookies.secure,
        settings.session.session_duration_hours,
    );
    let csrf_config = CsrfConfig::from_settings(&settings.csrf)
        .map_err(|e| std::io::Error::other(format!("Invalid CSRF settings: {e}")))?;
    let guard = web::Data::new(CsrfGuard::new(csrf_config, sessions.clone()));
    let sessions = web::Data::new(sessions);
    let registry = web::Data::new(SharedRegistry::new(registry));

    // Same origins as the CSRF check
    let cors_origins = settings.csrf.trusted_origins.clone();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                let origin = origin.to_str().unwrap_or("");
                cors_origins
                    .iter()
                    .any(|allowed| allowed.trim_end_matches('/') == origin)
            })
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec!["Content-Type", "Accept", HEADER_NAME])
            .expose_headers(vec![HEADER_NAME])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(sessions.clone())
            .app_data(guard.clone())
            .app_data(registry.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &AuthgateSettings, registry: &ProviderRegistry) {
    println!("Starting authgate on http://{bind_address}");
    println!("Storage: in-memory (sessions are lost on restart)");
    println!();
    println!("Endpoints:");
    println!("  GET      /login/{{provider}}          - Start login");
    println!("  GET      /auth/{{provider}}/callback  - Provider callback");
    println!("  GET      /session                   - Current session and CSRF token");
    println!("  GET      /logout                    - End session");
    println!("  GET|POST /protected                 - CSRF-protected demo route");
    println!("  GET      /ping                      - Health check");
    println!();
    println!("Callback URLs to register with identity providers:");
    for id in registry.ids() {
        println!("  {id}: {}", settings.callback_url(id));
    }
}
