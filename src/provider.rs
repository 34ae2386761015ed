use crate::shared::ids::ProviderId;

pub mod anthropic;
pub mod dispatch;
pub mod http;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod types;

pub use crate::failure::{FailureCategory, ProviderFailure};
pub use dispatch::{Dispatched, Dispatcher};
pub use registry::{build_builtin_provider, ProviderRegistry, BUILTIN_PROVIDER_IDS};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use types::{
    GenerationParams, ImagePayload, ProviderLimits, ProviderRequest, ProviderResponse, TokenUsage,
};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),
    #[error("environment variable `{var}` holding the {provider} API key is not set")]
    MissingApiKey { provider: String, var: String },
    #[error("invalid base url `{url}` for provider {provider}")]
    InvalidBaseUrl { provider: String, url: String },
}

/// One AI vision backend behind the normalized request/response contract.
///
/// Implementations classify their own transport and HTTP failures into a
/// [`ProviderFailure`]; empty-text detection and retries happen in the
/// [`Dispatcher`], uniformly for every backend.
pub trait VisionProvider {
    fn id(&self) -> &ProviderId;

    fn limits(&self) -> &ProviderLimits;

    fn describe(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderFailure>;
}
