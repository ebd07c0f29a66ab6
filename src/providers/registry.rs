use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use log::warn;

use crate::error::{AuthError, AuthResult};
use crate::providers::generic::OAuth2Provider;
use crate::providers::github::GitHubProvider;
use crate::providers::oauth2::{Endpoint, OAuth2Config};
use crate::providers::Provider;
use crate::settings::{AuthgateSettings, ProviderSettings};
use crate::utils::logging::LoggingHelper;

/// Providers by id, in registration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// # Errors
    ///
    /// Returns `UnknownProvider` if no provider is registered under `id`
    pub fn get(&self, id: &str) -> AuthResult<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(id.to_string()))
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build a registry from the `[[providers]]` settings
    ///
    /// Disabled and incomplete entries are skipped with a log line; they never fail
    /// startup.
    #[must_use]
    pub fn from_settings(settings: &AuthgateSettings) -> Self {
        LoggingHelper::log_provider_initialization();

        let mut builder = Self::builder();
        for provider_settings in &settings.providers {
            if !provider_settings.enabled {
                LoggingHelper::log_provider_disabled(&provider_settings.id);
                continue;
            }

            let callback_url = settings.callback_url(&provider_settings.id);
            match build_provider(provider_settings, &callback_url) {
                Ok(provider) => {
                    LoggingHelper::log_provider_registered(
                        provider_settings.display_name(),
                        &provider_settings.id,
                    );
                    builder = builder.register(provider);
                }
                Err(reason) => {
                    LoggingHelper::log_provider_not_configured(&provider_settings.id, &reason);
                }
            }
        }

        let registry = builder.build();
        LoggingHelper::log_providers_summary(&registry.ids());
        registry
    }
}

fn build_provider(settings: &ProviderSettings, callback_url: &str) -> Result<Arc<dyn Provider>, String> {
    if settings.id.is_empty() {
        return Err("missing id".to_string());
    }
    let client_id = settings
        .get_client_id()
        .ok_or_else(|| "missing client_id".to_string())?;
    let client_secret = settings.get_client_secret().unwrap_or_default();

    match settings.kind.as_str() {
        "github" => {
            let mut provider = GitHubProvider::new(&client_id, &client_secret, callback_url)
                .with_identity(&settings.id, settings.display_name())
                .with_scopes(&settings.scopes)
                .with_allowed_orgs(settings.allowed_orgs.clone());
            if let Some(url) = settings.enterprise_url.as_deref().filter(|u| !u.is_empty()) {
                provider = provider.with_enterprise_url(url);
            }
            Ok(Arc::new(provider))
        }
        "oauth2" => {
            let required = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| format!("missing {name}"))
            };
            let endpoint = Endpoint {
                auth_url: required(&settings.authorization_endpoint, "authorization_endpoint")?,
                token_url: required(&settings.token_endpoint, "token_endpoint")?,
                device_auth_url: None,
            };
            let userinfo_url = required(&settings.userinfo_endpoint, "userinfo_endpoint")?;
            if !settings.allowed_orgs.is_empty() {
                warn!(
                    "Provider {} has allowed_orgs but generic OAuth2 providers report no memberships",
                    settings.id
                );
            }

            let config = OAuth2Config::new(
                &client_id,
                &client_secret,
                callback_url,
                endpoint,
                settings.scopes.clone(),
            );
            Ok(Arc::new(
                OAuth2Provider::new(&settings.id, settings.display_name(), config, &userinfo_url)
                    .with_allowed_orgs(settings.allowed_orgs.clone()),
            ))
        }
        other => Err(format!("unsupported kind '{other}'")),
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    providers: IndexMap<String, Arc<dyn Provider>>,
}

impl RegistryBuilder {
    /// Add `provider`; a later registration under the same id replaces the earlier one
    #[must_use]
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        let id = provider.id().to_string();
        if self.providers.insert(id.clone(), provider).is_some() {
            warn!("Provider {id} registered twice, keeping the last registration");
        }
        self
    }

    #[must_use]
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}

/// Registry handle that can be swapped while requests hold older snapshots
#[derive(Default)]
pub struct SharedRegistry {
    current: RwLock<Arc<ProviderRegistry>>,
}

impl SharedRegistry {
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Current registry; a poisoned lock still yields the last stored value
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProviderRegistry> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, registry: ProviderRegistry) {
        let registry = Arc::new(registry);
        match self.current.write() {
            Ok(mut guard) => *guard = registry,
            Err(poisoned) => *poisoned.into_inner() = registry,
        }
    }
}
