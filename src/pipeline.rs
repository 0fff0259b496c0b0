use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::extract::{extract_entries, non_blank_lines, Extractor};
use crate::grade::check_entry;
use crate::models::{EntryStatus, Extracted, GradeBatch, GradeRequest, ProcessedEntry, Summary};
use crate::roster::RosterLookup;

pub const UNNAMED_STUDENT: &str = "Unnamed student";

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Upper bound on roster lookups in flight at once.
    pub lookup_concurrency: usize,
    /// Time the primary extractor gets before the line splitter takes over.
    pub extraction_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            lookup_concurrency: 8,
            extraction_timeout: Duration::from_secs(30),
        }
    }
}

/// Turns pasted grade text into reviewed entries plus summary counts.
///
/// Never fails: every problem is recorded on the entry it belongs to, and
/// every non-blank input line yields exactly one entry in input order.
pub async fn process_grades(
    request: GradeRequest,
    extractor: Option<&dyn Extractor>,
    roster: &dyn RosterLookup,
    options: PipelineOptions,
) -> GradeBatch {
    let total_source_lines = non_blank_lines(&request.source_text).count();
    let extracted = extract_entries(&request.source_text, extractor, options.extraction_timeout).await;

    let mut successfully_parsed = 0usize;
    let checked: Vec<(ProcessedEntry, bool)> = extracted
        .into_iter()
        .map(|item| match item {
            Extracted::Entry(raw) => {
                successfully_parsed += 1;
                let mut entry = ProcessedEntry::parsed(raw);
                let needs_lookup = check_entry(&mut entry);
                (entry, needs_lookup)
            }
            Extracted::Unreadable { line } => (ProcessedEntry::unreadable(line), false),
        })
        .collect();

    let class_id = request.class_id.as_str();
    let processed_entries: Vec<ProcessedEntry> = stream::iter(checked)
        .map(move |(entry, needs_lookup)| async move {
            if needs_lookup {
                resolve_student(entry, roster, class_id).await
            } else {
                entry
            }
        })
        .buffered(options.lookup_concurrency.max(1))
        .collect()
        .await;

    let summary = aggregate(total_source_lines, successfully_parsed, &processed_entries);
    info!(
        exam_id = %request.exam_id,
        lines = summary.total_source_lines,
        valid = summary.valid_entries,
        needs_review = processed_entries.len() - summary.valid_entries,
        "processed grade batch"
    );

    GradeBatch {
        request,
        processed_at: Utc::now(),
        processed_entries,
        summary,
    }
}

async fn resolve_student(
    mut entry: ProcessedEntry,
    roster: &dyn RosterLookup,
    class_id: &str,
) -> ProcessedEntry {
    match roster.find_by_matricula(&entry.matricula).await {
        Ok(Some(student)) => {
            // accepted anyway; the roster match is not scoped to the class
            if student.class_id.as_deref().is_some_and(|enrolled| enrolled != class_id) {
                warn!(
                    matricula = %entry.matricula,
                    enrolled = student.class_id.as_deref().unwrap_or_default(),
                    batch_class = class_id,
                    "matricula belongs to another class"
                );
            }
            entry.status = EntryStatus::Valid;
            entry.student_id = Some(student.id);
            entry.student_name = Some(
                student
                    .full_name
                    .unwrap_or_else(|| UNNAMED_STUDENT.to_string()),
            );
        }
        Ok(None) => {
            let message = format!("matricula {} not found in roster", entry.matricula);
            entry.fail(EntryStatus::InvalidMatricula, message);
        }
        Err(err) => {
            warn!(matricula = %entry.matricula, error = %err, "roster lookup failed");
            entry.fail(
                EntryStatus::UnknownError,
                "unexpected error while looking up the student",
            );
        }
    }
    entry
}

pub fn aggregate(
    total_source_lines: usize,
    successfully_parsed: usize,
    entries: &[ProcessedEntry],
) -> Summary {
    let mut summary = Summary {
        total_source_lines,
        successfully_parsed,
        ..Summary::default()
    };

    for entry in entries {
        match entry.status {
            EntryStatus::Valid => summary.valid_entries += 1,
            EntryStatus::InvalidMatricula => summary.invalid_matricula += 1,
            EntryStatus::InvalidGradeFormat => summary.invalid_grade_format += 1,
            EntryStatus::InvalidGradeValue => summary.invalid_grade_value += 1,
            EntryStatus::UnknownError => summary.unknown_error += 1,
            EntryStatus::Parsed => {}
        }
    }

    summary
}
