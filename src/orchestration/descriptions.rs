//! `descriptions/image_descriptions.txt`: one block per described item,
//! appended as soon as the description arrives.

use crate::item::{DescriptionResult, WorkItem};
use crate::orchestration::error::{io_error, OrchestratorError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// Prefix of every description line after the first. No field label or
/// separator starts with whitespace, so indented lines are never mistaken
/// for either.
const CONTINUATION_INDENT: &str = "  ";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptionEntry {
    pub path: PathBuf,
    pub source_video: Option<PathBuf>,
    pub provider: String,
    pub model: String,
    pub prompt_style: String,
    pub description: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct DescriptionWriter {
    path: PathBuf,
    prompt_style: String,
}

impl DescriptionWriter {
    pub fn new(path: impl Into<PathBuf>, prompt_style: &str) -> Self {
        Self {
            path: path.into(),
            prompt_style: prompt_style.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        item: &WorkItem,
        result: &DescriptionResult,
    ) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
        }
        let mut block = format!("File: {}\n", item.item_ref());
        if let Some(video) = &item.source_video {
            block.push_str(&format!("Source Video: {}\n", video.display()));
        }
        block.push_str(&format!(
            "Provider: {}\nModel: {}\nPrompt Style: {}\nDescription: {}\nTimestamp: {}\n{ENTRY_SEPARATOR}\n",
            result.provider,
            result.model,
            self.prompt_style,
            indent_continuation(result.text.trim()),
            chrono::Local::now().to_rfc3339(),
        ));

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| io_error(&self.path, err))?;
        file.write_all(block.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|err| io_error(&self.path, err))
    }
}

fn indent_continuation(text: &str) -> String {
    text.lines()
        .collect::<Vec<_>>()
        .join(&format!("\n{CONTINUATION_INDENT}"))
}

/// Parses a descriptions file. A block ends at a separator line; indented
/// lines after `Description:` continue the description.
pub fn read_entries(path: &Path) -> Result<Vec<DescriptionEntry>, OrchestratorError> {
    let raw = fs::read_to_string(path).map_err(|err| io_error(path, err))?;
    let mut entries = Vec::new();
    let mut entry = DescriptionEntry::default();
    let mut in_description = false;
    for line in raw.lines() {
        if line == ENTRY_SEPARATOR {
            push_entry(&mut entries, std::mem::take(&mut entry));
            in_description = false;
            continue;
        }
        if in_description {
            if let Some(rest) = line.strip_prefix(CONTINUATION_INDENT) {
                entry.description.push('\n');
                entry.description.push_str(rest);
                continue;
            }
        }
        in_description = false;
        if let Some(value) = line.strip_prefix("File: ") {
            entry.path = PathBuf::from(value.trim());
        } else if let Some(value) = line.strip_prefix("Source Video: ") {
            entry.source_video = Some(PathBuf::from(value.trim()));
        } else if let Some(value) = line.strip_prefix("Provider: ") {
            entry.provider = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Model: ") {
            entry.model = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Prompt Style: ") {
            entry.prompt_style = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Description:") {
            entry.description = value.trim_start().to_string();
            in_description = true;
        } else if let Some(value) = line.strip_prefix("Timestamp: ") {
            entry.timestamp = value.trim().to_string();
        }
    }
    push_entry(&mut entries, entry);
    Ok(entries)
}

fn push_entry(entries: &mut Vec<DescriptionEntry>, mut entry: DescriptionEntry) {
    if !entry.path.as_os_str().is_empty() {
        entry.description = entry.description.trim().to_string();
        entries.push(entry);
    }
}
