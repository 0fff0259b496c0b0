use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest grade on the school's grading scale.
pub const GRADE_MIN: f64 = 0.0;
/// Highest grade on the school's grading scale.
pub const GRADE_MAX: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    pub class_id: String,
    pub subject_id: String,
    pub exam_id: String,
    pub source_text: String,
}

/// One matricula/grade candidate pulled out of the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    pub matricula: String,
    pub grade_raw: String,
    /// Only set when the entry came from the line splitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_line: Option<String>,
}

/// Output of an extractor for a single recognised line.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Entry(RawEntry),
    /// A non-blank line the splitter could not break into matricula and grade.
    Unreadable { line: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Parsed,
    Valid,
    InvalidMatricula,
    InvalidGradeFormat,
    InvalidGradeValue,
    UnknownError,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Parsed => "parsed",
            EntryStatus::Valid => "valid",
            EntryStatus::InvalidMatricula => "invalid_matricula",
            EntryStatus::InvalidGradeFormat => "invalid_grade_format",
            EntryStatus::InvalidGradeValue => "invalid_grade_value",
            EntryStatus::UnknownError => "unknown_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    pub matricula: String,
    pub grade_raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_numeric: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProcessedEntry {
    pub fn parsed(raw: RawEntry) -> Self {
        Self {
            matricula: raw.matricula,
            grade_raw: raw.grade_raw,
            original_line: raw.original_line,
            grade_numeric: None,
            student_id: None,
            student_name: None,
            status: EntryStatus::Parsed,
            message: None,
        }
    }

    pub fn unreadable(line: String) -> Self {
        Self {
            matricula: String::new(),
            grade_raw: String::new(),
            message: Some(format!(
                "could not extract matricula and grade from line \"{line}\""
            )),
            original_line: Some(line),
            grade_numeric: None,
            student_id: None,
            student_name: None,
            status: EntryStatus::UnknownError,
        }
    }

    pub fn fail(&mut self, status: EntryStatus, message: impl Into<String>) {
        self.status = status;
        self.message = Some(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.status == EntryStatus::Valid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_source_lines: usize,
    pub successfully_parsed: usize,
    pub valid_entries: usize,
    pub invalid_matricula: usize,
    pub invalid_grade_format: usize,
    pub invalid_grade_value: usize,
    pub unknown_error: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBatch {
    pub request: GradeRequest,
    pub processed_at: DateTime<Utc>,
    pub processed_entries: Vec<ProcessedEntry>,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub matricula: String,
    pub class_id: Option<String>,
}
