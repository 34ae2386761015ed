use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn status_log_path(run_dir: &Path) -> PathBuf {
    run_dir.join("logs/status.log")
}

/// Append-only JSON-lines log for one run directory.
#[derive(Debug, Clone)]
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn for_run_dir(run_dir: &Path) -> Self {
        Self {
            path: status_log_path(run_dir),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, event: &str, message: &str, fields: Map<String, Value>) {
        self.append("info", event, message, fields);
    }

    pub fn warn(&self, event: &str, message: &str, fields: Map<String, Value>) {
        self.append("warn", event, message, fields);
    }

    pub fn error(&self, event: &str, message: &str, fields: Map<String, Value>) {
        self.append("error", event, message, fields);
    }

    /// Failures to log are dropped; a broken log must not stop a run.
    pub fn append(&self, level: &str, event: &str, message: &str, fields: Map<String, Value>) {
        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::String(chrono::Local::now().to_rfc3339()),
        );
        payload.insert("level".to_string(), Value::String(level.to_string()));
        payload.insert("event".to_string(), Value::String(event.to_string()));
        payload.insert("message".to_string(), Value::String(message.to_string()));
        for (key, value) in fields {
            payload.entry(key).or_insert(value);
        }

        let Ok(line) = serde_json::to_string(&Value::Object(payload)) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }

    pub fn read_events(&self) -> std::io::Result<Vec<Value>> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// Builds the field map for a log line: `log_fields!("attempt" => 2, "provider" => id)`.
#[macro_export]
macro_rules! log_fields {
    () => { serde_json::Map::new() };
    ($($key:literal => $value:expr),+ $(,)?) => {{
        let mut fields = serde_json::Map::new();
        $( fields.insert($key.to_string(), serde_json::json!($value)); )+
        fields
    }};
}
