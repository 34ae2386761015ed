use super::http::{join_url, post_json};
use super::{ProviderLimits, ProviderRequest, ProviderResponse, TokenUsage, VisionProvider};
use crate::failure::ProviderFailure;
use crate::shared::ids::ProviderId;
use image::ImageFormat;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub fn default_ollama_limits() -> ProviderLimits {
    ProviderLimits {
        supported_formats: vec![ImageFormat::Jpeg, ImageFormat::Png],
        max_bytes: 20 * 1024 * 1024,
        min_dimension: 1,
        max_dimension: 8192,
    }
}

/// Local Ollama server, `/api/chat` with `stream: false`.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    id: ProviderId,
    base_url: String,
    limits: ProviderLimits,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn new(id: ProviderId, base_url: Option<&str>) -> Self {
        Self {
            id,
            base_url: base_url.unwrap_or(DEFAULT_OLLAMA_BASE_URL).to_string(),
            limits: default_ollama_limits(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl VisionProvider for OllamaProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    fn describe(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderFailure> {
        let mut options = Map::new();
        options.insert("num_predict".to_string(), json!(request.params.max_tokens));
        if let Some(temperature) = request.params.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        let body = json!({
            "model": request.model,
            "stream": false,
            "messages": [{
                "role": "user",
                "content": request.prompt,
                "images": [request.image.base64()],
            }],
            "options": Value::Object(options),
        });

        let reply = post_json::<ChatReply>(
            &self.agent,
            &join_url(&self.base_url, "api/chat"),
            &[],
            &body,
            request.timeout,
        )?;

        Ok(ProviderResponse {
            text: reply
                .body
                .message
                .map(|message| message.content)
                .unwrap_or_default(),
            model: reply.body.model.unwrap_or_else(|| request.model.clone()),
            usage: TokenUsage {
                prompt_tokens: reply.body.prompt_eval_count,
                completion_tokens: reply.body.eval_count,
            },
            http_status: reply.status,
            finish_reason: reply.body.done_reason,
        })
    }
}
