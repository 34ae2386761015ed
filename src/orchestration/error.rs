use crate::config::ConfigError;
use crate::item::ItemTransitionError;
use crate::media::MediaError;
use crate::orchestration::metadata_store::RunState;
use crate::provider::ProviderError;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error(transparent)]
    ItemTransition(#[from] ItemTransitionError),
    #[error("workflow run state transition `{from}` -> `{to}` is invalid")]
    InvalidRunTransition { from: RunState, to: RunState },
    #[error("a failure for `{item_ref}` is already recorded")]
    DuplicateFailure { item_ref: String },
    #[error("run directory name `{name}` is not a workflow run id")]
    InvalidRunId { name: String },
    #[error("could not allocate a unique run directory under {root}")]
    RunDirectoryExhausted { root: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ConfigError> for OrchestratorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &Path, source: serde_json::Error) -> OrchestratorError {
    OrchestratorError::Json {
        path: path.display().to_string(),
        source,
    }
}
