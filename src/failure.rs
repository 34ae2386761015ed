use crate::item::{ItemStatus, WorkItem};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    ValidationError,
    AuthError,
    RateLimitError,
    ServerError,
    TimeoutError,
    EmptyResponseError,
    UnknownError,
}

pub const ALL_FAILURE_CATEGORIES: [FailureCategory; 7] = [
    FailureCategory::ValidationError,
    FailureCategory::AuthError,
    FailureCategory::RateLimitError,
    FailureCategory::ServerError,
    FailureCategory::TimeoutError,
    FailureCategory::EmptyResponseError,
    FailureCategory::UnknownError,
];

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::AuthError => "AuthError",
            Self::RateLimitError => "RateLimitError",
            Self::ServerError => "ServerError",
            Self::TimeoutError => "TimeoutError",
            Self::EmptyResponseError => "EmptyResponseError",
            Self::UnknownError => "UnknownError",
        }
    }

    /// Transient categories that a later attempt can plausibly fix.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::RateLimitError | Self::TimeoutError
        )
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    UnsupportedFormat,
    Unreadable,
    Corrupted,
    TooLarge,
    DimensionsOutOfBounds,
    ConversionFailed,
    ExtractionFailed,
}

impl ValidationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::Unreadable => "unreadable",
            Self::Corrupted => "corrupted",
            Self::TooLarge => "too_large",
            Self::DimensionsOutOfBounds => "dimensions_out_of_bounds",
            Self::ConversionFailed => "conversion_failed",
            Self::ExtractionFailed => "extraction_failed",
        }
    }
}

pub fn remediation_hint(category: FailureCategory, reason: Option<ValidationReason>) -> String {
    let hint = match (category, reason) {
        (FailureCategory::ValidationError, Some(ValidationReason::TooLarge)) => {
            "resize below provider limit"
        }
        (FailureCategory::ValidationError, Some(ValidationReason::UnsupportedFormat)) => {
            "convert to a format the provider accepts (enable the convert step)"
        }
        (FailureCategory::ValidationError, Some(ValidationReason::Corrupted))
        | (FailureCategory::ValidationError, Some(ValidationReason::Unreadable)) => {
            "file could not be decoded; re-export or replace it"
        }
        (FailureCategory::ValidationError, Some(ValidationReason::DimensionsOutOfBounds)) => {
            "resize so both sides are within the provider's dimension bounds"
        }
        (FailureCategory::ValidationError, Some(ValidationReason::ConversionFailed)) => {
            "convert the file manually or install the configured converter"
        }
        (FailureCategory::ValidationError, Some(ValidationReason::ExtractionFailed)) => {
            "check that the video plays and that ffmpeg supports its codec"
        }
        (FailureCategory::ValidationError, None) => "check the file format and size",
        (FailureCategory::AuthError, _) => "check the API key or credentials for the provider",
        (FailureCategory::RateLimitError, _) => "reduce request rate / add delay",
        (FailureCategory::ServerError, _) => {
            "provider returned server errors; rerun the failed items later"
        }
        (FailureCategory::TimeoutError, _) => {
            "raise provider.timeout_seconds or use a smaller image or model"
        }
        (FailureCategory::EmptyResponseError, _) => {
            "provider billed a response with no text; raise max_tokens, retry, or report it upstream"
        }
        (FailureCategory::UnknownError, _) => "inspect logs/status.log for the raw error",
    };
    hint.to_string()
}

/// A classified failure from one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub category: FailureCategory,
    pub message: String,
    pub http_status: Option<u16>,
    pub finish_reason: Option<String>,
    pub retry_after: Option<Duration>,
}

impl ProviderFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            http_status: None,
            finish_reason: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: Option<String>) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.category, self.message),
            None => write!(f, "{}: {}", self.category, self.message),
        }
    }
}

/// The terminal failure of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub item_ref: String,
    pub category: FailureCategory,
    pub message: String,
    #[serde(default)]
    pub http_status: Option<u16>,
    pub attempts: u32,
    pub attempts_exhausted: bool,
    pub remediation_hint: String,
    pub status: ItemStatus,
    pub file_type: String,
    #[serde(default)]
    pub validation_reason: Option<ValidationReason>,
}

impl FailureRecord {
    /// Rejected before any provider call.
    pub fn validation(item: &WorkItem, reason: ValidationReason, message: impl Into<String>) -> Self {
        Self {
            item_ref: item.item_ref(),
            category: FailureCategory::ValidationError,
            message: message.into(),
            http_status: None,
            attempts: 0,
            attempts_exhausted: false,
            remediation_hint: remediation_hint(FailureCategory::ValidationError, Some(reason)),
            status: ItemStatus::Skipped,
            file_type: item.file_type.clone(),
            validation_reason: Some(reason),
        }
    }

    /// Never dispatched because the run stopped before reaching the item.
    pub fn not_dispatched(
        item: &WorkItem,
        category: FailureCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_ref: item.item_ref(),
            category,
            message: message.into(),
            http_status: None,
            attempts: 0,
            attempts_exhausted: false,
            remediation_hint: remediation_hint(category, None),
            status: ItemStatus::Skipped,
            file_type: item.file_type.clone(),
            validation_reason: None,
        }
    }

    /// Dispatched at least once and given up on.
    pub fn dispatch(
        item: &WorkItem,
        failure: &ProviderFailure,
        attempts: u32,
        attempts_exhausted: bool,
    ) -> Self {
        Self {
            item_ref: item.item_ref(),
            category: failure.category,
            message: failure.message.clone(),
            http_status: failure.http_status,
            attempts,
            attempts_exhausted,
            remediation_hint: remediation_hint(failure.category, None),
            status: ItemStatus::Failed,
            file_type: item.file_type.clone(),
            validation_reason: None,
        }
    }
}
