use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// One row of the doctor directory. Column names follow the source dataset,
/// including the Cyrillic review column with its Latin-named fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorRecord {
    #[serde(default)]
    pub name: Option<String>,
    /// Primary specialty.
    #[serde(default)]
    pub spec: Option<String>,
    /// Key specialization.
    #[serde(default)]
    pub doctor_specialization: Option<String>,
    /// Raw additional-specialties list; may contain HTML and mixed separators.
    #[serde(default)]
    pub specialities: Option<String>,
    #[serde(default)]
    pub doctor_category: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub education: Option<String>,
    #[serde(default)]
    pub education_add: Option<String>,
    #[serde(default)]
    pub detail_text: Option<String>,
    #[serde(default, rename = "отзыв")]
    pub review: Option<String>,
    #[serde(default)]
    pub reviews: Option<String>,
}

impl DoctorRecord {
    /// Non-empty, trimmed view of an optional field.
    pub(crate) fn text(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Flat doctor dataset, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct DoctorDirectory {
    records: Vec<DoctorRecord>,
}

impl DoctorDirectory {
    pub fn from_records(records: Vec<DoctorRecord>) -> Self {
        Self { records }
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path.as_ref())?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: DoctorRecord = row?;
            records.push(record);
        }
        info!(count = records.len(), "doctor directory loaded");
        Ok(Self { records })
    }

    pub fn records(&self) -> &[DoctorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
