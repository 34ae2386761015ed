use super::http::{join_url, post_json};
use super::{ProviderLimits, ProviderRequest, ProviderResponse, TokenUsage, VisionProvider};
use crate::failure::ProviderFailure;
use crate::shared::ids::ProviderId;
use image::ImageFormat;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

pub fn default_openai_limits() -> ProviderLimits {
    ProviderLimits {
        supported_formats: vec![
            ImageFormat::Png,
            ImageFormat::Jpeg,
            ImageFormat::WebP,
            ImageFormat::Gif,
        ],
        max_bytes: 20 * 1024 * 1024,
        min_dimension: 1,
        max_dimension: 8192,
    }
}

/// OpenAI-compatible `/v1/chat/completions` with an inline data URL image.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    id: ProviderId,
    base_url: String,
    api_key: String,
    limits: ProviderLimits,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    /// Null when the completion budget was spent on reasoning.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(id: ProviderId, api_key: String, base_url: Option<&str>) -> Self {
        Self {
            id,
            base_url: base_url.unwrap_or(DEFAULT_OPENAI_BASE_URL).to_string(),
            api_key,
            limits: default_openai_limits(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl VisionProvider for OpenAiProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    fn describe(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderFailure> {
        let data_url = format!(
            "data:{};base64,{}",
            request.image.media_type,
            request.image.base64()
        );
        let mut body = json!({
            "model": request.model,
            "max_completion_tokens": request.params.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": request.prompt},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
        });
        if let (Some(temperature), Value::Object(map)) = (request.params.temperature, &mut body) {
            map.insert("temperature".to_string(), json!(temperature));
        }

        let reply = post_json::<CompletionReply>(
            &self.agent,
            &join_url(&self.base_url, "v1/chat/completions"),
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
            request.timeout,
        )?;

        let status = reply.status;
        let body = reply.body;
        let usage = body
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();
        let first = body.choices.into_iter().next();
        let finish_reason = first.as_ref().and_then(|choice| choice.finish_reason.clone());
        let text = first
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            usage,
            http_status: status,
            finish_reason,
        })
    }
}
