use super::{resolve_prompt, ConfigError};
use crate::shared::ids::{PromptStyle, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    ExtractVideo,
    Convert,
    Describe,
    Report,
}

pub const ALL_WORKFLOW_STEPS: [WorkflowStep; 4] = [
    WorkflowStep::ExtractVideo,
    WorkflowStep::Convert,
    WorkflowStep::Describe,
    WorkflowStep::Report,
];

impl WorkflowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtractVideo => "extract_video",
            Self::Convert => "convert",
            Self::Describe => "describe",
            Self::Report => "report",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "extract_video" | "video" => Ok(Self::ExtractVideo),
            "convert" => Ok(Self::Convert),
            "describe" => Ok(Self::Describe),
            "report" | "html" => Ok(Self::Report),
            _ => Err("step must be one of: extract_video, convert, describe, report".to_string()),
        }
    }

    /// Parses a comma separated list such as `describe,report`.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Canonical execution order with duplicates removed.
    pub fn normalize(steps: &[Self]) -> Vec<Self> {
        let mut ordered = steps.to_vec();
        ordered.sort();
        ordered.dedup();
        ordered
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("workflow_runs")
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

fn default_steps() -> Vec<WorkflowStep> {
    ALL_WORKFLOW_STEPS.to_vec()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_auth_abort_after() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default)]
    pub convert: ConvertSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub resume: ResumeSettings,
    /// Extra prompt styles, keyed by style name.
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
    /// Consecutive authentication failures (with no success yet) that stop the describe step.
    #[serde(default = "default_auth_abort_after")]
    pub auth_abort_after: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_workflow_name")]
    pub name: String,
    #[serde(default = "default_steps")]
    pub steps: Vec<WorkflowStep>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            steps: default_steps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    pub id: ProviderId,
    pub model: String,
    #[serde(default)]
    pub prompt_style: PromptStyle,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key; each cloud backend has a default.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the backend's documented upload limit.
    #[serde(default)]
    pub max_image_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub retry_empty_response: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 8_000,
            retry_empty_response: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoSettings {
    pub ffmpeg_binary: String,
    pub frame_interval_seconds: f64,
    /// Zero means no cap.
    pub max_frames_per_video: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            frame_interval_seconds: 5.0,
            max_frames_per_video: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConvertSettings {
    pub heic_converter: String,
    pub jpeg_quality: u8,
    pub downscale_oversized: bool,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            heic_converter: "heif-convert".to_string(),
            jpeg_quality: 90,
            downscale_oversized: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub min_dimension: u32,
    #[serde(default)]
    pub max_dimension: Option<u32>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_dimension: 16,
            max_dimension: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResumeSettings {
    /// A previous run directory; inputs already described there are left out.
    #[serde(default)]
    pub skip_described_from: Option<PathBuf>,
}

/// Provider parameters frozen into a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderId,
    pub model: String,
    pub prompt_style: PromptStyle,
    pub prompt: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    pub timeout_seconds: u64,
}

impl ProviderSettings {
    pub fn new(id: ProviderId, model: impl Into<String>) -> Self {
        Self {
            id,
            model: model.into(),
            prompt_style: PromptStyle::default(),
            max_tokens: default_max_tokens(),
            temperature: None,
            timeout_seconds: default_timeout_seconds(),
            base_url: None,
            api_key_env: None,
            max_image_bytes: None,
        }
    }
}

impl Settings {
    /// Defaults for every section except the provider, which has none.
    pub fn for_provider(provider: ProviderSettings) -> Self {
        Self {
            output_root: default_output_root(),
            workflow: WorkflowSettings::default(),
            provider,
            retry: RetrySettings::default(),
            video: VideoSettings::default(),
            convert: ConvertSettings::default(),
            validation: ValidationSettings::default(),
            resume: ResumeSettings::default(),
            prompts: BTreeMap::new(),
            auth_abort_after: default_auth_abort_after(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.name.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`workflow.name` must be non-empty".to_string(),
            ));
        }
        if self.workflow.steps.is_empty() {
            return Err(ConfigError::Settings(
                "`workflow.steps` must be non-empty".to_string(),
            ));
        }
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`provider.model` must be non-empty".to_string(),
            ));
        }
        if self.provider.max_tokens == 0 {
            return Err(ConfigError::Settings(
                "`provider.max_tokens` must be >= 1".to_string(),
            ));
        }
        if self.provider.timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`provider.timeout_seconds` must be >= 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Settings(
                "`retry.max_attempts` must be >= 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Settings(format!(
                "`retry.base_delay_ms` ({}) must not exceed `retry.max_delay_ms` ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if !(self.video.frame_interval_seconds > 0.0) {
            return Err(ConfigError::Settings(
                "`video.frame_interval_seconds` must be > 0".to_string(),
            ));
        }
        if self.convert.jpeg_quality == 0 || self.convert.jpeg_quality > 100 {
            return Err(ConfigError::Settings(
                "`convert.jpeg_quality` must be within 1..=100".to_string(),
            ));
        }
        if let Some(max) = self.validation.max_dimension {
            if max < self.validation.min_dimension {
                return Err(ConfigError::Settings(format!(
                    "`validation.max_dimension` ({max}) is below `validation.min_dimension` ({})",
                    self.validation.min_dimension
                )));
            }
        }
        if self.auth_abort_after == 0 {
            return Err(ConfigError::Settings(
                "`auth_abort_after` must be >= 1".to_string(),
            ));
        }
        resolve_prompt(self.provider.prompt_style.as_str(), &self.prompts)?;
        Ok(())
    }

    pub fn provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        Ok(ProviderConfig {
            provider: self.provider.id.clone(),
            model: self.provider.model.trim().to_string(),
            prompt_style: self.provider.prompt_style.clone(),
            prompt: resolve_prompt(self.provider.prompt_style.as_str(), &self.prompts)?,
            max_tokens: self.provider.max_tokens,
            temperature: self.provider.temperature,
            timeout_seconds: self.provider.timeout_seconds,
        })
    }
}
