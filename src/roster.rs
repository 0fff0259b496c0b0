use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::LookupError;
use crate::models::StudentRecord;

/// Resolves a matricula to a student record.
///
/// Matching is on the matricula alone; a student enrolled in another class
/// still resolves.
#[async_trait]
pub trait RosterLookup: Send + Sync {
    async fn find_by_matricula(&self, matricula: &str)
        -> Result<Option<StudentRecord>, LookupError>;
}

#[derive(Debug, Deserialize)]
pub struct RosterCsvRow {
    pub full_name: Option<String>,
    pub matricula: String,
    pub class_id: Option<String>,
}

/// Roster held in memory, loaded from a CSV export.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRoster {
    students: HashMap<String, StudentRecord>,
}

impl InMemoryRoster {
    pub fn new(records: impl IntoIterator<Item = StudentRecord>) -> Self {
        let mut students = HashMap::new();
        for record in records {
            // first row wins, like LIMIT 1 on the database
            students.entry(record.matricula.clone()).or_insert(record);
        }
        Self { students }
    }

    pub fn from_csv(csv_path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(csv_path)
            .with_context(|| format!("failed to open roster {}", csv_path.display()))?;
        let mut records = Vec::new();

        for result in reader.deserialize::<RosterCsvRow>() {
            let row = result?;
            let matricula = row.matricula.trim().to_string();
            if matricula.is_empty() {
                continue;
            }
            records.push(StudentRecord {
                id: Uuid::new_v5(&Uuid::NAMESPACE_OID, matricula.as_bytes()),
                full_name: row.full_name.filter(|name| !name.trim().is_empty()),
                matricula,
                class_id: row.class_id,
            });
        }

        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

#[async_trait]
impl RosterLookup for InMemoryRoster {
    async fn find_by_matricula(
        &self,
        matricula: &str,
    ) -> Result<Option<StudentRecord>, LookupError> {
        Ok(self.students.get(matricula.trim()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn csv_roster_resolves_known_matriculas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "full_name,matricula,class_id").unwrap();
        writeln!(file, "Avery Lee,12345,turma-a").unwrap();
        writeln!(file, ",67890,turma-b").unwrap();
        writeln!(file, "Nobody,  ,turma-b").unwrap();
        file.flush().unwrap();

        let roster = InMemoryRoster::from_csv(file.path()).unwrap();
        assert_eq!(roster.len(), 2);

        let avery = roster.find_by_matricula("12345").await.unwrap().unwrap();
        assert_eq!(avery.full_name.as_deref(), Some("Avery Lee"));
        assert_eq!(avery.class_id.as_deref(), Some("turma-a"));

        let unnamed = roster.find_by_matricula(" 67890 ").await.unwrap().unwrap();
        assert_eq!(unnamed.full_name, None);

        assert!(roster.find_by_matricula("ABC01").await.unwrap().is_none());
    }

    #[test]
    fn csv_ids_are_stable_per_matricula() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "full_name,matricula,class_id\nKiara Patel,44444,").unwrap();
        file.flush().unwrap();

        let first = InMemoryRoster::from_csv(file.path()).unwrap();
        let second = InMemoryRoster::from_csv(file.path()).unwrap();
        assert_eq!(
            first.students["44444"].id,
            second.students["44444"].id
        );
    }
}
