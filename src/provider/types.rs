use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, format: ImageFormat) -> Self {
        Self {
            bytes,
            media_type: format.to_mime_type().to_string(),
        }
    }

    pub fn base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub item_id: String,
    pub model: String,
    pub prompt: String,
    pub image: ImagePayload,
    pub params: GenerationParams,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub http_status: u16,
    pub finish_reason: Option<String>,
}

/// What a backend accepts; checked before any call is made.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderLimits {
    pub supported_formats: Vec<ImageFormat>,
    pub max_bytes: u64,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl ProviderLimits {
    pub fn supports(&self, format: ImageFormat) -> bool {
        self.supported_formats.contains(&format)
    }

    pub fn format_names(&self) -> String {
        self.supported_formats
            .iter()
            .map(|format| format.extensions_str().first().copied().unwrap_or("?"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MB", bytes as f64 / MIB)
}
