use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::LookupError;
use crate::models::{EntryStatus, GradeBatch, StudentRecord};
use crate::roster::{RosterCsvRow, RosterLookup};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_student(
    pool: &PgPool,
    full_name: Option<&str>,
    matricula: &str,
    class_id: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO doce_acesso.students (id, full_name, matricula, class_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (matricula) DO UPDATE
        SET full_name = EXCLUDED.full_name, class_id = EXCLUDED.class_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(matricula)
    .bind(class_id)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let students = vec![
        ("Avery Lee", "12345", "turma-7a"),
        ("Jules Moreno", "67890", "turma-7a"),
        ("Kiara Patel", "44444", "turma-7b"),
    ];

    for (name, matricula, class_id) in students.iter().copied() {
        upsert_student(pool, Some(name), matricula, Some(class_id)).await?;
    }

    Ok(students.len())
}

pub async fn import_roster_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open roster {}", csv_path.display()))?;
    let mut imported = 0usize;

    for result in reader.deserialize::<RosterCsvRow>() {
        let row = result?;
        let matricula = row.matricula.trim();
        if matricula.is_empty() {
            continue;
        }
        upsert_student(
            pool,
            row.full_name.as_deref().filter(|name| !name.trim().is_empty()),
            matricula,
            row.class_id.as_deref(),
        )
        .await?;
        imported += 1;
    }

    Ok(imported)
}

/// Roster backed by the `doce_acesso.students` table.
#[derive(Clone)]
pub struct PgRoster {
    pool: PgPool,
}

impl PgRoster {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterLookup for PgRoster {
    async fn find_by_matricula(
        &self,
        matricula: &str,
    ) -> Result<Option<StudentRecord>, LookupError> {
        let row = sqlx::query(
            "SELECT id, full_name, matricula, class_id \
             FROM doce_acesso.students WHERE matricula = $1 LIMIT 1",
        )
        .bind(matricula.trim())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StudentRecord {
            id: row.try_get("id")?,
            full_name: row.try_get("full_name")?,
            matricula: row.try_get("matricula")?,
            class_id: row.try_get("class_id")?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeWrite {
    pub student_id: Option<Uuid>,
    pub matricula: String,
    pub grade: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub saved: usize,
    pub unlinked: usize,
    pub skipped: usize,
}

/// Picks the entries that may be stored. Valid entries always qualify;
/// unknown matriculas only when the reviewer forces them through.
pub fn plan_writes(batch: &GradeBatch, force_unlinked: bool) -> (Vec<GradeWrite>, usize) {
    let mut writes = Vec::new();
    let mut skipped = 0usize;

    for entry in &batch.processed_entries {
        let write = match (entry.status, entry.grade_numeric, entry.student_id) {
            (EntryStatus::Valid, Some(grade), Some(student_id)) => Some(GradeWrite {
                student_id: Some(student_id),
                matricula: entry.matricula.clone(),
                grade,
            }),
            (EntryStatus::InvalidMatricula, Some(grade), _) if force_unlinked => {
                Some(GradeWrite {
                    student_id: None,
                    matricula: entry.matricula.clone(),
                    grade,
                })
            }
            _ => None,
        };

        match write {
            Some(write) => writes.push(write),
            None => skipped += 1,
        }
    }

    (writes, skipped)
}

pub async fn save_batch(
    pool: &PgPool,
    batch: &GradeBatch,
    force_unlinked: bool,
) -> anyhow::Result<SaveOutcome> {
    let (writes, skipped) = plan_writes(batch, force_unlinked);
    let request = &batch.request;
    let mut outcome = SaveOutcome {
        skipped,
        ..SaveOutcome::default()
    };

    let mut tx = pool.begin().await?;

    for write in writes {
        let query = if write.student_id.is_some() {
            r#"
            INSERT INTO doce_acesso.grades
            (id, student_id, matricula, class_id, subject_id, exam_id, grade, unlinked, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8)
            ON CONFLICT (student_id, exam_id) WHERE student_id IS NOT NULL DO UPDATE
            SET grade = EXCLUDED.grade,
                matricula = EXCLUDED.matricula,
                class_id = EXCLUDED.class_id,
                subject_id = EXCLUDED.subject_id,
                recorded_at = EXCLUDED.recorded_at
            "#
        } else {
            r#"
            INSERT INTO doce_acesso.grades
            (id, student_id, matricula, class_id, subject_id, exam_id, grade, unlinked, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8)
            ON CONFLICT (matricula, exam_id) WHERE student_id IS NULL DO UPDATE
            SET grade = EXCLUDED.grade,
                class_id = EXCLUDED.class_id,
                subject_id = EXCLUDED.subject_id,
                recorded_at = EXCLUDED.recorded_at
            "#
        };

        sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(write.student_id)
            .bind(&write.matricula)
            .bind(&request.class_id)
            .bind(&request.subject_id)
            .bind(&request.exam_id)
            .bind(write.grade)
            .bind(batch.processed_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to save grade for matricula {}", write.matricula))?;

        if write.student_id.is_some() {
            outcome.saved += 1;
        } else {
            outcome.unlinked += 1;
        }
    }

    tx.commit().await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{GradeRequest, ProcessedEntry, RawEntry, Summary};

    fn entry(matricula: &str, status: EntryStatus, grade: Option<f64>) -> ProcessedEntry {
        let mut entry = ProcessedEntry::parsed(RawEntry {
            matricula: matricula.to_string(),
            grade_raw: grade.map(|g| g.to_string()).unwrap_or_default(),
            original_line: None,
        });
        entry.status = status;
        entry.grade_numeric = grade;
        if status == EntryStatus::Valid {
            entry.student_id = Some(Uuid::new_v4());
        }
        entry
    }

    fn batch(entries: Vec<ProcessedEntry>) -> GradeBatch {
        GradeBatch {
            request: GradeRequest {
                class_id: "turma-7a".to_string(),
                subject_id: "matematica".to_string(),
                exam_id: "prova-1".to_string(),
                source_text: String::new(),
            },
            processed_at: Utc::now(),
            processed_entries: entries,
            summary: Summary::default(),
        }
    }

    fn sample() -> GradeBatch {
        batch(vec![
            entry("12345", EntryStatus::Valid, Some(9.5)),
            entry("ABC01", EntryStatus::InvalidMatricula, Some(7.0)),
            entry("67890", EntryStatus::InvalidGradeValue, Some(15.0)),
            entry("44444", EntryStatus::InvalidGradeFormat, None),
            entry("55555", EntryStatus::UnknownError, Some(6.0)),
        ])
    }

    #[test]
    fn only_valid_entries_are_written_by_default() {
        let (writes, skipped) = plan_writes(&sample(), false);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].matricula, "12345");
        assert!(writes[0].student_id.is_some());
        assert_eq!(writes[0].grade, 9.5);
        assert_eq!(skipped, 4);
    }

    #[test]
    fn forcing_stores_unknown_matriculas_unlinked() {
        let (writes, skipped) = plan_writes(&sample(), true);
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[1],
            GradeWrite {
                student_id: None,
                matricula: "ABC01".to_string(),
                grade: 7.0,
            }
        );
        assert_eq!(skipped, 3);
    }
}
