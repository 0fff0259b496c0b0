use thiserror::Error;

use crate::models::{EntryStatus, ProcessedEntry, GRADE_MAX, GRADE_MIN};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradeError {
    #[error("grade \"{0}\" is not a valid number")]
    Format(String),

    #[error("grade {0} is outside the allowed range {min}-{max}", min = GRADE_MIN, max = GRADE_MAX)]
    OutOfRange(f64),
}

impl GradeError {
    pub fn status(&self) -> EntryStatus {
        match self {
            GradeError::Format(_) => EntryStatus::InvalidGradeFormat,
            GradeError::OutOfRange(_) => EntryStatus::InvalidGradeValue,
        }
    }
}

/// Turns a grade as written ("8,0", " 9.5 ", "7") into a number.
///
/// Only the first comma is treated as a decimal separator, so "9,5,5" is
/// rejected rather than truncated.
pub fn normalize_grade(raw: &str) -> Result<f64, GradeError> {
    let candidate = raw.trim().replacen(',', ".", 1);
    match candidate.parse::<f64>() {
        // adding zero turns "-0" into a plain 0
        Ok(value) if value.is_finite() => Ok(value + 0.0),
        _ => Err(GradeError::Format(raw.to_string())),
    }
}

pub fn validate_range(value: f64) -> Result<f64, GradeError> {
    if (GRADE_MIN..=GRADE_MAX).contains(&value) {
        Ok(value)
    } else {
        Err(GradeError::OutOfRange(value))
    }
}

/// Runs both grade checks on a freshly parsed entry. Returns whether the
/// entry should go on to roster matching.
pub fn check_entry(entry: &mut ProcessedEntry) -> bool {
    let checked = normalize_grade(&entry.grade_raw).and_then(|value| {
        entry.grade_numeric = Some(value);
        validate_range(value)
    });

    match checked {
        Ok(_) => true,
        Err(err) => {
            entry.fail(err.status(), err.to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEntry;

    fn entry(grade_raw: &str) -> ProcessedEntry {
        ProcessedEntry::parsed(RawEntry {
            matricula: "12345".to_string(),
            grade_raw: grade_raw.to_string(),
            original_line: None,
        })
    }

    #[test]
    fn decimal_comma_and_integers_normalize() {
        assert_eq!(normalize_grade("8,0"), Ok(8.0));
        assert_eq!(normalize_grade("10.0"), Ok(10.0));
        assert_eq!(normalize_grade("7"), Ok(7.0));
        assert_eq!(normalize_grade("  9.5 "), Ok(9.5));
    }

    #[test]
    fn negative_zero_normalizes_to_plain_zero() {
        for raw in ["-0", "-0,0", "-0.00"] {
            let value = normalize_grade(raw).unwrap();
            assert_eq!(value, 0.0);
            assert!(value.is_sign_positive(), "{raw:?} kept its sign");
            assert_eq!(serde_json::to_string(&value).unwrap(), "0.0");
        }
    }

    #[test]
    fn malformed_grades_are_format_errors() {
        for raw in ["9,5,5", "", "abc", "9.5.1", "NaN", "inf", "9 5"] {
            assert_eq!(
                normalize_grade(raw),
                Err(GradeError::Format(raw.to_string())),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(validate_range(0.0).is_ok());
        assert!(validate_range(10.0).is_ok());
        assert_eq!(validate_range(-0.01), Err(GradeError::OutOfRange(-0.01)));
        assert_eq!(validate_range(10.01), Err(GradeError::OutOfRange(10.01)));
        assert!(normalize_grade("10.1").and_then(validate_range).is_err());
    }

    #[test]
    fn out_of_range_message_cites_value_and_bounds() {
        let mut e = entry("15");
        assert!(!check_entry(&mut e));
        assert_eq!(e.status, EntryStatus::InvalidGradeValue);
        assert_eq!(e.grade_numeric, Some(15.0));
        let message = e.message.unwrap();
        assert!(message.contains("15"));
        assert!(message.contains("0-10"));
    }

    #[test]
    fn format_failure_keeps_raw_text_in_message() {
        let mut e = entry("9,5,5");
        assert!(!check_entry(&mut e));
        assert_eq!(e.status, EntryStatus::InvalidGradeFormat);
        assert_eq!(e.grade_numeric, None);
        assert!(e.message.unwrap().contains("9,5,5"));
    }

    #[test]
    fn good_grade_continues_to_matching() {
        let mut e = entry("9,5");
        assert!(check_entry(&mut e));
        assert_eq!(e.status, EntryStatus::Parsed);
        assert_eq!(e.grade_numeric, Some(9.5));
        assert!(e.message.is_none());
    }
}
