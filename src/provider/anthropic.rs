use super::http::{join_url, post_json};
use super::{ProviderLimits, ProviderRequest, ProviderResponse, TokenUsage, VisionProvider};
use crate::failure::ProviderFailure;
use crate::shared::ids::ProviderId;
use image::ImageFormat;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub fn default_anthropic_limits() -> ProviderLimits {
    ProviderLimits {
        supported_formats: vec![
            ImageFormat::Jpeg,
            ImageFormat::Png,
            ImageFormat::Gif,
            ImageFormat::WebP,
        ],
        max_bytes: 5 * 1024 * 1024,
        min_dimension: 1,
        max_dimension: 8000,
    }
}

/// Anthropic Messages API with a base64 image block.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    id: ProviderId,
    base_url: String,
    api_key: String,
    limits: ProviderLimits,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(id: ProviderId, api_key: String, base_url: Option<&str>) -> Self {
        Self {
            id,
            base_url: base_url.unwrap_or(DEFAULT_ANTHROPIC_BASE_URL).to_string(),
            api_key,
            limits: default_anthropic_limits(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl VisionProvider for AnthropicProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    fn describe(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderFailure> {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.params.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": request.image.media_type,
                            "data": request.image.base64(),
                        },
                    },
                    {"type": "text", "text": request.prompt},
                ],
            }],
        });
        if let (Some(temperature), Value::Object(map)) = (request.params.temperature, &mut body) {
            map.insert("temperature".to_string(), json!(temperature));
        }

        let reply = post_json::<MessagesReply>(
            &self.agent,
            &join_url(&self.base_url, "v1/messages"),
            &[
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            &body,
            request.timeout,
        )?;

        let status = reply.status;
        let body = reply.body;
        let text = body
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        let usage = body
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            usage,
            http_status: status,
            finish_reason: body.stop_reason,
        })
    }
}
