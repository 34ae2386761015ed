use crate::item::{ItemStatus, WorkItem};
use crate::orchestration::error::{io_error, OrchestratorError};
use crate::orchestration::failure_aggregator::FailureReport;
use crate::orchestration::metadata_store::WorkflowRun;
use crate::orchestration::run_dir::RunDirectory;
use crate::shared::fs_atomic::{atomic_write_file, atomic_write_json};
use std::fmt::Write as _;
use std::path::PathBuf;

/// `failure_report.json` and `failure_report.txt` at the run root.
pub fn write_failure_report(
    run_dir: &RunDirectory,
    report: &FailureReport,
) -> Result<(), OrchestratorError> {
    let json_path = run_dir.failure_report_json_path();
    atomic_write_json(&json_path, report).map_err(|err| io_error(&json_path, err))?;
    let text_path = run_dir.failure_report_text_path();
    atomic_write_file(&text_path, report.render_text().as_bytes())
        .map_err(|err| io_error(&text_path, err))
}

/// Plain listing of every item and its outcome. Returns the page path.
pub fn write_html_index(
    run_dir: &RunDirectory,
    run: &WorkflowRun,
    items: &[WorkItem],
    report: &FailureReport,
) -> Result<PathBuf, OrchestratorError> {
    let mut page = String::new();
    let _ = writeln!(page, "<!DOCTYPE html>");
    let _ = writeln!(page, "<html><head><meta charset=\"utf-8\">");
    let _ = writeln!(page, "<title>{}</title></head><body>", escape_html(&run.run_id));
    let _ = writeln!(page, "<h1>{}</h1>", escape_html(&run.name));
    let _ = writeln!(
        page,
        "<p>{} / {} / {}</p>",
        escape_html(&run.provider),
        escape_html(&run.model),
        escape_html(&run.prompt_style)
    );
    let _ = writeln!(page, "<p>{}</p>", escape_html(&report.headline()));

    for item in items {
        let _ = writeln!(page, "<section>");
        let _ = writeln!(page, "<h2>{}</h2>", escape_html(&item.item_ref()));
        if let Some(video) = &item.source_video {
            let _ = writeln!(
                page,
                "<p>frame of {}</p>",
                escape_html(&video.display().to_string())
            );
        }
        match (item.status, &item.result, &item.failure) {
            (ItemStatus::Success, Some(result), _) => {
                let _ = writeln!(page, "<p>{}</p>", escape_html(result.text.trim()));
            }
            (status, _, Some(failure)) => {
                let _ = writeln!(
                    page,
                    "<p><strong>{status}</strong>: {} ({})</p>",
                    escape_html(&failure.message),
                    failure.category
                );
            }
            (status, _, None) => {
                let _ = writeln!(page, "<p><strong>{status}</strong></p>");
            }
        }
        let _ = writeln!(page, "</section>");
    }
    let _ = writeln!(page, "</body></html>");

    let path = run_dir.html_dir().join("index.html");
    atomic_write_file(&path, page.as_bytes()).map_err(|err| io_error(&path, err))?;
    Ok(path)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
