use crate::config::{ProviderConfig, WorkflowStep};
use crate::item::{ItemStatus, WorkItem};
use crate::orchestration::error::{io_error, json_error, OrchestratorError};
use crate::shared::fs_atomic::atomic_write_json;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Aborted,
    Interrupted,
}

impl RunState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Aborted)
                | (RunState::Running, RunState::Interrupted)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Aborted => write!(f, "aborted"),
            RunState::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// `total == succeeded + failed + skipped + pending` at every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    #[serde(default)]
    pub pending: u32,
}

impl RunCounts {
    /// Items still `processing` count as pending.
    pub fn tally<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        let mut counts = Self::default();
        for item in items {
            counts.total += 1;
            match item.status {
                ItemStatus::Success => counts.succeeded += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Skipped => counts.skipped += 1,
                ItemStatus::Pending | ItemStatus::Processing => counts.pending += 1,
            }
        }
        counts
    }

    pub fn is_balanced(&self) -> bool {
        self.total == self.succeeded + self.failed + self.skipped + self.pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFatal {
    pub step: WorkflowStep,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub prompt_style: String,
    pub steps: Vec<WorkflowStep>,
    pub provider_config: ProviderConfig,
    pub input_path: PathBuf,
    pub state: RunState,
    #[serde(default)]
    pub current_step: Option<WorkflowStep>,
    pub counts: RunCounts,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    pub updated_at: String,
    #[serde(default)]
    pub fatal_error: Option<StepFatal>,
}

impl WorkflowRun {
    pub fn transition_state(&mut self, next: RunState) -> Result<(), OrchestratorError> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestratorError::InvalidRunTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// `workflow_metadata.json` of one run. Every write replaces the file
/// atomically, so readers never see a half-written document.
#[derive(Debug, Clone)]
pub struct WorkflowMetadataStore {
    path: PathBuf,
}

impl WorkflowMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, run: &WorkflowRun) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
        atomic_write_json(&self.path, run).map_err(|err| io_error(&self.path, err))
    }

    pub fn load(&self) -> Result<WorkflowRun, OrchestratorError> {
        let raw = fs::read_to_string(&self.path).map_err(|err| io_error(&self.path, err))?;
        serde_json::from_str(&raw).map_err(|err| json_error(&self.path, err))
    }
}
