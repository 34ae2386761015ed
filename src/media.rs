use crate::item::{ItemKind, WorkItem};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

pub mod convert;
pub mod frames;
pub mod validate;

pub use convert::{Conversion, Converter};
pub use frames::FrameExtractor;
pub use validate::{effective_limits, validate_image, ValidatedImage, ValidationFailure};

pub const IMAGE_EXTENSIONS: [&str; 12] = [
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "avif", "ico",
];

pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp", "wmv"];

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("input path {path} does not exist")]
    InputNotFound { path: String },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("required tool `{binary}` is not installed or not on PATH")]
    MissingTool { binary: String },
    #[error("`{binary}` exited with code {exit_code}: {stderr}")]
    ToolFailed {
        binary: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

impl MediaError {
    /// Errors that make a whole step impossible rather than one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingTool { .. } | Self::InputNotFound { .. })
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> MediaError {
    MediaError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn classify_path(path: &Path) -> Option<ItemKind> {
    let ext = extension_of(path)?;
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(ItemKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ItemKind::Video)
    } else {
        None
    }
}

pub fn is_heif(path: &Path) -> bool {
    matches!(extension_of(path).as_deref(), Some("heic" | "heif"))
}

/// A media path the walk found but could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableEntry {
    pub path: PathBuf,
    pub kind: ItemKind,
    pub message: String,
}

/// What a walk of the input produced.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub items: Vec<WorkItem>,
    /// Media paths that errored during the walk, in path order.
    pub unreadable: Vec<UnreadableEntry>,
    /// Walk errors below the root that do not name a media file.
    pub walk_errors: Vec<String>,
}

/// Every image and video under `input` (or `input` itself), in path order.
/// Hidden files and directories are ignored, as are paths under `exclude`.
/// Only a failure on `input` itself is an error; entries below it that
/// cannot be read are reported in the [`Discovery`].
pub fn discover_media(input: &Path, exclude: Option<&Path>) -> Result<Discovery, MediaError> {
    if !input.exists() {
        return Err(MediaError::InputNotFound {
            path: input.display().to_string(),
        });
    }

    let mut found: Vec<(PathBuf, ItemKind)> = Vec::new();
    let mut discovery = Discovery::default();
    let walker = WalkDir::new(input)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with('.'))
                    .unwrap_or(false)
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(MediaError::Walk {
                    path: input.display().to_string(),
                    source,
                })
            }
            Err(err) => {
                let message = err.to_string();
                let media = err
                    .path()
                    .filter(|path| exclude.map_or(true, |dir| !path.starts_with(dir)))
                    .and_then(|path| classify_path(path).map(|kind| (path.to_path_buf(), kind)));
                match media {
                    Some((path, kind)) => discovery.unreadable.push(UnreadableEntry {
                        path,
                        kind,
                        message,
                    }),
                    None => discovery.walk_errors.push(message),
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if exclude.is_some_and(|dir| entry.path().starts_with(dir)) {
            continue;
        }
        if let Some(kind) = classify_path(entry.path()) {
            found.push((entry.into_path(), kind));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    discovery.unreadable.sort_by(|a, b| a.path.cmp(&b.path));
    discovery.items = found
        .into_iter()
        .map(|(path, kind)| WorkItem::new(path, kind))
        .collect();
    Ok(discovery)
}

/// Runs `binary arg` once to check the tool can be spawned at all.
pub fn probe_tool(binary: &str, arg: &str) -> Result<(), MediaError> {
    match Command::new(binary).arg(arg).output() {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(MediaError::MissingTool {
            binary: binary.to_string(),
        }),
        Err(err) => Err(io_error(Path::new(binary), err)),
    }
}

/// Spawns `command`, mapping a missing binary and a non-zero exit onto
/// [`MediaError`]. Stderr is kept for the error message.
pub(crate) fn run_tool(binary: &str, command: &mut Command) -> Result<(), MediaError> {
    let output = match command.output() {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::MissingTool {
                binary: binary.to_string(),
            })
        }
        Err(err) => return Err(io_error(Path::new(binary), err)),
    };
    if output.status.success() {
        return Ok(());
    }
    Err(MediaError::ToolFailed {
        binary: binary.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// `dir/<stem>.<ext>`, or `dir/<stem>_2.<ext>`, … when already taken.
pub(crate) fn unique_output_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| dir.join(format!("{stem}_{n}.{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn classifies_by_lowercased_extension() {
        assert_eq!(classify_path(Path::new("a/B.JPG")), Some(ItemKind::Image));
        assert_eq!(classify_path(Path::new("clip.MOV")), Some(ItemKind::Video));
        assert_eq!(classify_path(Path::new("notes.txt")), None);
        assert_eq!(classify_path(Path::new("README")), None);
        assert!(is_heif(Path::new("x.HEIC")));
    }

    #[test]
    fn discovery_is_sorted_and_skips_hidden_and_excluded_paths() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("b")).expect("mkdir");
        fs::create_dir_all(root.join(".cache")).expect("mkdir");
        fs::create_dir_all(root.join("runs")).expect("mkdir");
        for name in ["b/z.png", "a.jpg", "clip.mp4", "notes.txt", ".cache/x.png", "runs/old.png"] {
            fs::write(root.join(name), b"x").expect("write");
        }

        let discovery = discover_media(root, Some(&root.join("runs"))).expect("discover");
        assert!(discovery.unreadable.is_empty());
        let items = discovery.items;
        let names: Vec<_> = items
            .iter()
            .map(|item| item.path.strip_prefix(root).expect("prefix").to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.jpg"),
                PathBuf::from("b/z.png"),
                PathBuf::from("clip.mp4")
            ]
        );
        assert_eq!(items[2].kind, ItemKind::Video);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_links_are_reported_without_stopping_the_walk() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("a.png"), b"x").expect("write");
        fs::write(root.join("c.jpg"), b"x").expect("write");
        std::os::unix::fs::symlink(root.join("gone.png"), root.join("b.png")).expect("symlink");
        std::os::unix::fs::symlink(root.join("gone"), root.join("d_dir")).expect("symlink");

        let discovery = discover_media(root, None).expect("discover");
        let names: Vec<_> = discovery
            .items
            .iter()
            .map(|item| item.path.strip_prefix(root).expect("prefix").to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("a.png"), PathBuf::from("c.jpg")]);
        assert_eq!(discovery.unreadable.len(), 1);
        assert_eq!(discovery.unreadable[0].path, root.join("b.png"));
        assert_eq!(discovery.unreadable[0].kind, ItemKind::Image);
        assert_eq!(discovery.walk_errors.len(), 1);
    }

    #[test]
    fn missing_input_and_missing_tools_are_reported() {
        let dir = tempdir().expect("tempdir");
        let err = discover_media(&dir.path().join("nope"), None).expect_err("missing");
        assert!(err.is_fatal());

        let err = probe_tool("vistaflow-no-such-binary", "-version").expect_err("missing");
        assert!(matches!(err, MediaError::MissingTool { .. }));
    }

    #[test]
    fn unique_output_path_appends_counter() {
        let dir = tempdir().expect("tempdir");
        let first = unique_output_path(dir.path(), "img", "jpg");
        fs::write(&first, b"x").expect("write");
        assert_eq!(
            unique_output_path(dir.path(), "img", "jpg"),
            dir.path().join("img_2.jpg")
        );
    }
}
