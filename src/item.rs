use crate::failure::FailureRecord;
use crate::provider::TokenUsage;
use crate::shared::ids::item_id_for_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Image,
    Video,
    ExtractedFrame,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::ExtractedFrame => "extracted_frame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::Processing)
                | (ItemStatus::Pending, ItemStatus::Skipped)
                | (ItemStatus::Processing, ItemStatus::Success)
                | (ItemStatus::Processing, ItemStatus::Failed)
                | (ItemStatus::Processing, ItemStatus::Skipped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Success | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Processing => write!(f, "processing"),
            ItemStatus::Success => write!(f, "success"),
            ItemStatus::Failed => write!(f, "failed"),
            ItemStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("work item `{item_ref}` cannot move from `{from}` to `{to}`")]
pub struct ItemTransitionError {
    pub item_ref: String,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionResult {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// The file the next stage reads; replaced by conversion.
    pub path: PathBuf,
    /// The path the item is reported under.
    pub origin: PathBuf,
    #[serde(default)]
    pub source_video: Option<PathBuf>,
    pub kind: ItemKind,
    pub file_type: String,
    pub status: ItemStatus,
    pub attempts: u32,
    #[serde(default)]
    pub result: Option<DescriptionResult>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>, kind: ItemKind) -> Self {
        let path = path.into();
        Self {
            id: item_id_for_path(&path),
            origin: path.clone(),
            file_type: file_type_of(&path),
            path,
            source_video: None,
            kind,
            status: ItemStatus::Pending,
            attempts: 0,
            result: None,
            failure: None,
        }
    }

    pub fn frame_of(video: &WorkItem, frame_path: impl Into<PathBuf>) -> Self {
        let mut frame = Self::new(frame_path, ItemKind::ExtractedFrame);
        frame.source_video = Some(video.origin.clone());
        frame
    }

    pub fn item_ref(&self) -> String {
        self.origin.display().to_string()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }

    pub fn begin(&mut self) -> Result<(), ItemTransitionError> {
        self.transition(ItemStatus::Processing)
    }

    pub fn succeed(
        &mut self,
        result: DescriptionResult,
        attempts: u32,
    ) -> Result<(), ItemTransitionError> {
        self.transition(ItemStatus::Success)?;
        self.attempts = attempts;
        self.result = Some(result);
        Ok(())
    }

    /// Terminal status comes from the record (`failed` or `skipped`).
    pub fn terminate(&mut self, record: FailureRecord) -> Result<(), ItemTransitionError> {
        self.transition(record.status)?;
        self.attempts = record.attempts;
        self.failure = Some(record);
        Ok(())
    }

    fn transition(&mut self, next: ItemStatus) -> Result<(), ItemTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(ItemTransitionError {
                item_ref: self.item_ref(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .map(|ext| if ext == "jpeg" { "jpg".to_string() } else { ext })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{FailureCategory, ProviderFailure, ValidationReason};

    fn sample_result() -> DescriptionResult {
        DescriptionResult {
            text: "a cat".to_string(),
            provider: "fake".to_string(),
            model: "m".to_string(),
            usage: TokenUsage::default(),
            finish_reason: Some("stop".to_string()),
        }
    }

    #[test]
    fn happy_path_reaches_success_once() {
        let mut item = WorkItem::new("photos/cat.JPEG", ItemKind::Image);
        assert_eq!(item.file_type, "jpg");
        item.begin().expect("begin");
        item.succeed(sample_result(), 2).expect("succeed");
        assert_eq!(item.status, ItemStatus::Success);
        assert_eq!(item.attempts, 2);

        let again = item.begin().expect_err("cannot restart");
        assert_eq!(again.from, ItemStatus::Success);
        assert_eq!(again.to, ItemStatus::Processing);
    }

    #[test]
    fn validation_failure_skips_with_zero_attempts() {
        let mut item = WorkItem::new("photos/broken.png", ItemKind::Image);
        item.begin().expect("begin");
        let record = FailureRecord::validation(&item, ValidationReason::Corrupted, "bad crc");
        item.terminate(record).expect("terminate");
        assert_eq!(item.status, ItemStatus::Skipped);
        assert_eq!(item.attempts, 0);
        assert!(item.result.is_none());
        assert_eq!(
            item.failure.as_ref().map(|f| f.category),
            Some(FailureCategory::ValidationError)
        );
    }

    #[test]
    fn pending_items_cannot_fail_without_processing() {
        let mut item = WorkItem::new("photos/a.png", ItemKind::Image);
        let failure = ProviderFailure::new(FailureCategory::ServerError, "500");
        let record = FailureRecord::dispatch(&item, &failure, 1, false);
        assert!(item.terminate(record).is_err());
        assert_eq!(item.status, ItemStatus::Pending);
    }

    #[test]
    fn frames_report_under_their_own_path_and_remember_the_video() {
        let video = WorkItem::new("clips/beach.mp4", ItemKind::Video);
        let frame = WorkItem::frame_of(&video, "run/extracted_frames/beach/beach_00001.jpg");
        assert_eq!(frame.kind, ItemKind::ExtractedFrame);
        assert_eq!(frame.source_video.as_deref(), Some(Path::new("clips/beach.mp4")));
        assert!(frame.item_ref().ends_with("beach_00001.jpg"));
        assert_eq!(frame.file_type, "jpg");
    }
}
