use super::anthropic::{AnthropicProvider, DEFAULT_ANTHROPIC_KEY_ENV};
use super::ollama::OllamaProvider;
use super::openai::{OpenAiProvider, DEFAULT_OPENAI_KEY_ENV};
use super::{ProviderError, ProviderLimits, VisionProvider};
use crate::config::ProviderSettings;
use crate::shared::ids::ProviderId;
use std::collections::BTreeMap;

pub const BUILTIN_PROVIDER_IDS: [&str; 3] = ["ollama", "openai", "anthropic"];

/// Providers addressable by id. A run resolves exactly one of them.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Box<dyn VisionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the configured built-in backend.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        registry.register(build_builtin_provider(settings)?);
        Ok(registry)
    }

    /// Replaces any provider already registered under the same id.
    pub fn register(&mut self, provider: Box<dyn VisionProvider>) {
        self.providers.insert(provider.id().clone(), provider);
    }

    pub fn get(&self, id: &ProviderId) -> Result<&dyn VisionProvider, ProviderError> {
        self.providers
            .get(id)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

pub fn build_builtin_provider(
    settings: &ProviderSettings,
) -> Result<Box<dyn VisionProvider>, ProviderError> {
    build_builtin_provider_with_env(settings, |var| std::env::var(var).ok())
}

pub fn build_builtin_provider_with_env<F>(
    settings: &ProviderSettings,
    lookup_env: F,
) -> Result<Box<dyn VisionProvider>, ProviderError>
where
    F: Fn(&str) -> Option<String>,
{
    let id = settings.id.clone();
    let base_url = settings.base_url.as_deref().map(str::trim);
    if let Some(url) = base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProviderError::InvalidBaseUrl {
                provider: id.to_string(),
                url: url.to_string(),
            });
        }
    }
    let api_key = |default_var: &str| -> Result<String, ProviderError> {
        let var = settings.api_key_env.as_deref().unwrap_or(default_var);
        lookup_env(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider: id.to_string(),
                var: var.to_string(),
            })
    };

    let provider: Box<dyn VisionProvider> = match id.as_str() {
        "ollama" => {
            let backend = OllamaProvider::new(id.clone(), base_url);
            let limits = limits_with_override(backend.limits(), settings.max_image_bytes);
            Box::new(backend.with_limits(limits))
        }
        "openai" => {
            let backend =
                OpenAiProvider::new(id.clone(), api_key(DEFAULT_OPENAI_KEY_ENV)?, base_url);
            let limits = limits_with_override(backend.limits(), settings.max_image_bytes);
            Box::new(backend.with_limits(limits))
        }
        "anthropic" => {
            let backend =
                AnthropicProvider::new(id.clone(), api_key(DEFAULT_ANTHROPIC_KEY_ENV)?, base_url);
            let limits = limits_with_override(backend.limits(), settings.max_image_bytes);
            Box::new(backend.with_limits(limits))
        }
        other => return Err(ProviderError::UnknownProvider(other.to_string())),
    };
    Ok(provider)
}

fn limits_with_override(limits: &ProviderLimits, max_image_bytes: Option<u64>) -> ProviderLimits {
    let mut limits = limits.clone();
    if let Some(max_bytes) = max_image_bytes {
        limits.max_bytes = max_bytes;
    }
    limits
}
