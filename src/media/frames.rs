use super::{io_error, run_tool, MediaError};
use crate::config::VideoSettings;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Samples still frames from videos through an external `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FrameExtractor<'a> {
    settings: &'a VideoSettings,
    output_dir: PathBuf,
}

impl<'a> FrameExtractor<'a> {
    pub fn new(settings: &'a VideoSettings, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            output_dir: output_dir.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.settings.ffmpeg_binary
    }

    /// Fails with [`MediaError::MissingTool`] when ffmpeg cannot be spawned.
    pub fn probe(&self) -> Result<(), MediaError> {
        super::probe_tool(self.binary(), "-version")
    }

    /// One JPEG every `frame_interval_seconds`, written to a directory of
    /// its own under the output dir. Returns the frames in order.
    pub fn extract(&self, video: &Path) -> Result<Vec<PathBuf>, MediaError> {
        let stem = video
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("video");
        let frame_dir = unique_dir(&self.output_dir, stem);
        fs::create_dir_all(&frame_dir).map_err(|err| io_error(&frame_dir, err))?;

        let pattern = frame_dir.join(format!("{stem}_%05d.jpg"));
        let mut command = Command::new(self.binary());
        command
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(video)
            .arg("-vf")
            .arg(format!("fps=1/{}", self.settings.frame_interval_seconds));
        if self.settings.max_frames_per_video > 0 {
            command
                .arg("-frames:v")
                .arg(self.settings.max_frames_per_video.to_string());
        }
        command.args(["-q:v", "2"]).arg(&pattern);
        run_tool(self.binary(), &mut command)?;

        let mut frames = fs::read_dir(&frame_dir)
            .map_err(|err| io_error(&frame_dir, err))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg"))
            })
            .collect::<Vec<_>>();
        frames.sort();
        if frames.is_empty() {
            return Err(MediaError::ToolFailed {
                binary: self.binary().to_string(),
                exit_code: 0,
                stderr: format!("no frames extracted from {}", video.display()),
            });
        }
        Ok(frames)
    }
}

fn unique_dir(parent: &Path, stem: &str) -> PathBuf {
    let first = parent.join(stem);
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| parent.join(format!("{stem}_{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}
