use std::fmt::Write;

use crate::models::{EntryStatus, GradeBatch, ProcessedEntry};

fn describe_entry(entry: &ProcessedEntry) -> String {
    match (&entry.grade_numeric, entry.matricula.is_empty()) {
        (_, true) => format!(
            "line \"{}\"",
            entry.original_line.as_deref().unwrap_or_default()
        ),
        (Some(grade), false) => format!("{} ({})", entry.matricula, grade),
        (None, false) => format!("{} (\"{}\")", entry.matricula, entry.grade_raw),
    }
}

/// Markdown review sheet for a processed batch.
pub fn build_report(batch: &GradeBatch) -> String {
    let summary = &batch.summary;
    let request = &batch.request;
    let mut output = String::new();

    let _ = writeln!(output, "# Grade Entry Review");
    let _ = writeln!(
        output,
        "Class {}, subject {}, exam {} (processed {})",
        request.class_id,
        request.subject_id,
        request.exam_id,
        batch.processed_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Source lines: {}", summary.total_source_lines);
    let _ = writeln!(output, "- Parsed: {}", summary.successfully_parsed);
    let _ = writeln!(output, "- Valid: {}", summary.valid_entries);
    let _ = writeln!(output, "- Unknown matricula: {}", summary.invalid_matricula);
    let _ = writeln!(output, "- Unreadable grade: {}", summary.invalid_grade_format);
    let _ = writeln!(output, "- Grade out of range: {}", summary.invalid_grade_value);
    let _ = writeln!(output, "- Other errors: {}", summary.unknown_error);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Ready to Save");

    let valid: Vec<&ProcessedEntry> = batch
        .processed_entries
        .iter()
        .filter(|entry| entry.is_valid())
        .collect();
    if valid.is_empty() {
        let _ = writeln!(output, "No entries matched the roster.");
    } else {
        for entry in valid {
            let _ = writeln!(
                output,
                "- {} {}: {}",
                entry.matricula,
                entry.student_name.as_deref().unwrap_or_default(),
                entry.grade_numeric.unwrap_or_default()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Review");

    let flagged: Vec<&ProcessedEntry> = batch
        .processed_entries
        .iter()
        .filter(|entry| !entry.is_valid())
        .collect();
    if flagged.is_empty() {
        let _ = writeln!(output, "Nothing to review.");
    } else {
        for entry in flagged {
            let _ = writeln!(
                output,
                "- [{}] {}: {}",
                entry.status.as_str(),
                describe_entry(entry),
                entry.message.as_deref().unwrap_or("no details")
            );
        }
    }

    if batch
        .processed_entries
        .iter()
        .any(|entry| entry.status == EntryStatus::InvalidMatricula)
    {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Unknown matriculas can still be stored as unlinked grades with `save --force-unlinked`."
        );
    }

    output
}
