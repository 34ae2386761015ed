use crate::orchestration::error::{io_error, OrchestratorError};
use crate::shared::ids::sanitize_component;
use crate::shared::logging::status_log_path;
use chrono::NaiveDateTime;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const RUN_PREFIX: &str = "wf";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_COLLISION_SUFFIX: u32 = 999;

pub const CONVERTED_IMAGES_DIR: &str = "converted_images";
pub const EXTRACTED_FRAMES_DIR: &str = "extracted_frames";
pub const DESCRIPTIONS_FILE: &str = "descriptions/image_descriptions.txt";
pub const METADATA_FILE: &str = "workflow_metadata.json";
pub const HTML_OUTPUT_DIR: &str = "html_output";
pub const FAILURE_REPORT_JSON: &str = "failure_report.json";
pub const FAILURE_REPORT_TEXT: &str = "failure_report.txt";

/// The parts a run directory name is built from:
/// `wf_<name>_<provider>_<model>_<prompt-style>_<YYYYMMDD_HHMMSS>[_<n>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunName {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub prompt_style: String,
    pub timestamp: NaiveDateTime,
    /// Collision counter, 2 and up; absent for the first run of that second.
    pub sequence: Option<u32>,
}

impl RunName {
    pub fn new(
        name: &str,
        provider: &str,
        model: &str,
        prompt_style: &str,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            name: sanitize_component(name),
            provider: sanitize_component(provider),
            model: sanitize_component(model),
            prompt_style: sanitize_component(prompt_style),
            timestamp,
            sequence: None,
        }
    }

    pub fn with_sequence(&self, sequence: u32) -> Self {
        Self {
            sequence: Some(sequence),
            ..self.clone()
        }
    }

    pub fn dir_name(&self) -> String {
        let base = format!(
            "{RUN_PREFIX}_{}_{}_{}_{}_{}",
            self.name,
            self.provider,
            self.model,
            self.prompt_style,
            self.timestamp.format(TIMESTAMP_FORMAT)
        );
        match self.sequence {
            Some(n) => format!("{base}_{n}"),
            None => base,
        }
    }

    pub fn parse(dir_name: &str) -> Result<Self, OrchestratorError> {
        let invalid = || OrchestratorError::InvalidRunId {
            name: dir_name.to_string(),
        };
        let parts: Vec<&str> = dir_name.split('_').collect();
        if !(parts.len() == 7 || parts.len() == 8) || parts[0] != RUN_PREFIX {
            return Err(invalid());
        }
        if parts[1..5].iter().any(|part| part.is_empty()) {
            return Err(invalid());
        }
        let timestamp =
            NaiveDateTime::parse_from_str(&format!("{}_{}", parts[5], parts[6]), TIMESTAMP_FORMAT)
                .map_err(|_| invalid())?;
        let sequence = match parts.get(7) {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| invalid())?),
            None => None,
        };
        Ok(Self {
            name: parts[1].to_string(),
            provider: parts[2].to_string(),
            model: parts[3].to_string(),
            prompt_style: parts[4].to_string(),
            timestamp,
            sequence,
        })
    }
}

impl std::fmt::Display for RunName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// A created run directory and the fixed layout inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    root: PathBuf,
    name: RunName,
}

impl RunDirectory {
    /// Creates a fresh directory under `output_root`. An existing directory
    /// is never reused: a `_2`, `_3`, … suffix is appended instead.
    pub fn create(output_root: &Path, name: &RunName) -> Result<Self, OrchestratorError> {
        fs::create_dir_all(output_root).map_err(|err| io_error(output_root, err))?;

        let mut candidate = name.clone();
        let root = loop {
            let path = output_root.join(candidate.dir_name());
            match fs::create_dir(&path) {
                Ok(()) => break path,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let next = candidate.sequence.map_or(2, |n| n + 1);
                    if next > MAX_COLLISION_SUFFIX {
                        return Err(OrchestratorError::RunDirectoryExhausted {
                            root: output_root.display().to_string(),
                        });
                    }
                    candidate = name.with_sequence(next);
                }
                Err(err) => return Err(io_error(&path, err)),
            }
        };

        let dir = Self {
            root,
            name: candidate,
        };
        for sub in [
            dir.converted_dir(),
            dir.frames_dir(),
            dir.html_dir(),
            dir.root.join("descriptions"),
            dir.root.join("logs"),
        ] {
            fs::create_dir_all(&sub).map_err(|err| io_error(&sub, err))?;
        }
        Ok(dir)
    }

    /// Opens an existing run directory, e.g. a previous run to resume from.
    pub fn open(root: &Path) -> Result<Self, OrchestratorError> {
        let dir_name = root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| OrchestratorError::InvalidRunId {
                name: root.display().to_string(),
            })?;
        Ok(Self {
            root: root.to_path_buf(),
            name: RunName::parse(dir_name)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &RunName {
        &self.name
    }

    pub fn run_id(&self) -> String {
        self.name.dir_name()
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join(CONVERTED_IMAGES_DIR)
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join(EXTRACTED_FRAMES_DIR)
    }

    pub fn descriptions_path(&self) -> PathBuf {
        self.root.join(DESCRIPTIONS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn status_log_path(&self) -> PathBuf {
        status_log_path(&self.root)
    }

    pub fn html_dir(&self) -> PathBuf {
        self.root.join(HTML_OUTPUT_DIR)
    }

    pub fn failure_report_json_path(&self) -> PathBuf {
        self.root.join(FAILURE_REPORT_JSON)
    }

    pub fn failure_report_text_path(&self) -> PathBuf {
        self.root.join(FAILURE_REPORT_TEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|date| date.and_hms_opt(14, 5, 7))
            .expect("timestamp")
    }

    #[test]
    fn dir_name_encodes_every_component() {
        let name = RunName::new("Trip photos", "ollama", "llava:13b", "detailed", timestamp());
        assert_eq!(
            name.dir_name(),
            "wf_Trip-photos_ollama_llava-13b_detailed_20240309_140507"
        );
        assert_eq!(RunName::parse(&name.dir_name()).expect("parse"), name);
    }

    #[test]
    fn parse_rejects_foreign_names() {
        for raw in [
            "photos",
            "wf_a_b_c_d_2024_1200",
            "wf_a_b_c_d_20240309_140507_x",
            "run_a_b_c_d_20240309_140507",
        ] {
            assert!(RunName::parse(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn colliding_runs_get_numeric_suffixes() {
        let dir = tempdir().expect("tempdir");
        let name = RunName::new("batch", "openai", "gpt-4o", "concise", timestamp());

        let first = RunDirectory::create(dir.path(), &name).expect("first");
        let second = RunDirectory::create(dir.path(), &name).expect("second");
        let third = RunDirectory::create(dir.path(), &name).expect("third");

        assert_eq!(first.run_id(), "wf_batch_openai_gpt-4o_concise_20240309_140507");
        assert_eq!(second.run_id(), format!("{}_2", first.run_id()));
        assert_eq!(third.run_id(), format!("{}_3", first.run_id()));
        assert!(first.converted_dir().is_dir());
        assert!(first.frames_dir().is_dir());
        assert!(first.html_dir().is_dir());
        assert!(first.descriptions_path().parent().expect("parent").is_dir());
        assert!(first.status_log_path().parent().expect("parent").is_dir());

        let reopened = RunDirectory::open(second.root()).expect("open");
        assert_eq!(reopened.name().sequence, Some(2));
    }
}
