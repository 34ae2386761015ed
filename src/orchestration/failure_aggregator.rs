use crate::failure::{remediation_hint, FailureCategory, FailureRecord, ALL_FAILURE_CATEGORIES};
use crate::item::ItemStatus;
use crate::orchestration::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: FailureCategory,
    pub count: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Share of all items in the run.
    pub rate: f64,
    pub remediation_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTypeSummary {
    pub file_type: String,
    pub total: u32,
    pub failures: u32,
    /// Share of the items of this file type.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub path: String,
    pub category: FailureCategory,
    pub status: ItemStatus,
    pub message: String,
    pub attempts: u32,
    #[serde(default)]
    pub http_status: Option<u16>,
    pub remediation_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub total_items: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub by_category: Vec<CategorySummary>,
    pub by_file_type: Vec<FileTypeSummary>,
    pub entries: Vec<ReportEntry>,
}

impl FailureReport {
    pub fn headline(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped ({} total)",
            self.succeeded, self.failed, self.skipped, self.total_items
        )
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run summary: {}", self.headline());
        if self.entries.is_empty() {
            let _ = writeln!(out, "\nNo failures.");
            return out;
        }

        let _ = writeln!(out, "\nFailures by category:");
        for group in &self.by_category {
            let _ = writeln!(
                out,
                "  {}: {} ({:.1}% of items; {} failed, {} skipped)\n    hint: {}",
                group.category,
                group.count,
                group.rate * 100.0,
                group.failed,
                group.skipped,
                group.remediation_hint
            );
        }

        let _ = writeln!(out, "\nFailures by file type:");
        for group in self.by_file_type.iter().filter(|group| group.failures > 0) {
            let _ = writeln!(
                out,
                "  {}: {} of {} ({:.1}%)",
                group.file_type,
                group.failures,
                group.total,
                group.rate * 100.0
            );
        }

        let _ = writeln!(out, "\nItems:");
        for entry in &self.entries {
            let status = match entry.http_status {
                Some(code) => format!(", HTTP {code}"),
                None => String::new(),
            };
            let _ = writeln!(
                out,
                "  [{}] {}\n    {} after {} attempt(s){}: {}",
                entry.status, entry.path, entry.category, entry.attempts, status, entry.message
            );
        }
        out
    }
}

/// Append-only collection of terminal failures for one run.
///
/// Records are never merged or dropped. A second record for an item that
/// already has one is refused, and the first record stays.
#[derive(Debug, Clone, Default)]
pub struct FailureAggregator {
    records: Vec<FailureRecord>,
    seen: BTreeSet<String>,
    items_by_file_type: BTreeMap<String, u32>,
    total_items: u32,
}

impl FailureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one describable item toward the failure-rate denominators.
    pub fn register_item(&mut self, file_type: &str) {
        self.total_items += 1;
        *self
            .items_by_file_type
            .entry(file_type.to_string())
            .or_insert(0) += 1;
    }

    pub fn record(&mut self, record: FailureRecord) -> Result<(), OrchestratorError> {
        if !self.seen.insert(record.item_ref.clone()) {
            return Err(OrchestratorError::DuplicateFailure {
                item_ref: record.item_ref,
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Assumes every registered item is terminal, so anything without a
    /// record counts as succeeded.
    pub fn summarize(&self) -> FailureReport {
        let failed = self
            .records
            .iter()
            .filter(|record| record.status == ItemStatus::Failed)
            .count() as u32;
        let skipped = self.records.len() as u32 - failed;
        let total_items = self.total_items.max(self.records.len() as u32);

        let by_category = ALL_FAILURE_CATEGORIES
            .iter()
            .filter_map(|category| {
                let matching = self
                    .records
                    .iter()
                    .filter(|record| record.category == *category)
                    .collect::<Vec<_>>();
                if matching.is_empty() {
                    return None;
                }
                let failed = matching
                    .iter()
                    .filter(|record| record.status == ItemStatus::Failed)
                    .count() as u32;
                let count = matching.len() as u32;
                Some(CategorySummary {
                    category: *category,
                    count,
                    failed,
                    skipped: count - failed,
                    rate: ratio(count, total_items),
                    remediation_hint: category_hint(*category, &matching),
                })
            })
            .collect();

        let mut failures_by_type: BTreeMap<&str, u32> = BTreeMap::new();
        for record in &self.records {
            *failures_by_type.entry(record.file_type.as_str()).or_insert(0) += 1;
        }
        let mut file_types: BTreeSet<&str> =
            self.items_by_file_type.keys().map(String::as_str).collect();
        file_types.extend(failures_by_type.keys().copied());
        let by_file_type = file_types
            .into_iter()
            .map(|file_type| {
                let failures = failures_by_type.get(file_type).copied().unwrap_or(0);
                let total = self
                    .items_by_file_type
                    .get(file_type)
                    .copied()
                    .unwrap_or(0)
                    .max(failures);
                FileTypeSummary {
                    file_type: file_type.to_string(),
                    total,
                    failures,
                    rate: ratio(failures, total),
                }
            })
            .collect();

        let entries = self
            .records
            .iter()
            .map(|record| ReportEntry {
                path: record.item_ref.clone(),
                category: record.category,
                status: record.status,
                message: record.message.clone(),
                attempts: record.attempts,
                http_status: record.http_status,
                remediation_hint: record.remediation_hint.clone(),
            })
            .collect();

        FailureReport {
            total_items,
            succeeded: total_items - failed - skipped,
            failed,
            skipped,
            by_category,
            by_file_type,
            entries,
        }
    }
}

/// Validation failures carry reason-specific hints; when every record in
/// the group agrees on one, it is more useful than the generic one.
fn category_hint(category: FailureCategory, records: &[&FailureRecord]) -> String {
    let first = records[0].remediation_hint.as_str();
    if records.iter().all(|record| record.remediation_hint == first) {
        first.to_string()
    } else {
        remediation_hint(category, None)
    }
}

fn ratio(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
