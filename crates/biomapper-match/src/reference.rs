//! Reference name index consumed by the fuzzy stages.
//!
//! A read-only `id → name [→ synonyms]` table. Names are normalized once
//! at load time so the O(entities × references) scan compares cheap
//! pre-cleaned strings.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use biomapper_common::normalize::normalize;
use biomapper_common::{BiomapperError, Result};

#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub id: String,
    pub name: String,
    pub synonyms: Vec<String>,
    /// Pre-normalized name plus synonyms, in that order.
    pub normalized_forms: Vec<String>,
}

impl ReferenceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, synonyms: Vec<String>) -> Self {
        let name = name.into();
        let mut normalized_forms = vec![normalize(&name)];
        normalized_forms.extend(synonyms.iter().map(|s| normalize(s)));
        Self {
            id: id.into(),
            name,
            synonyms,
            normalized_forms,
        }
    }
}

/// CSV row shape: `id,name,synonyms` with synonyms pipe-separated.
#[derive(Debug, Deserialize)]
struct ReferenceRow {
    id: String,
    name: String,
    #[serde(default)]
    synonyms: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    records: Vec<ReferenceRecord>,
}

impl ReferenceIndex {
    pub fn from_records(records: Vec<ReferenceRecord>) -> Self {
        Self { records }
    }

    /// Build from `(id, name)` pairs, no synonyms.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let records = pairs
            .into_iter()
            .map(|(id, name)| ReferenceRecord::new(id, name, vec![]))
            .collect();
        Self { records }
    }

    /// Load from a CSV file with `id,name,synonyms` columns.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref()).map_err(|e| {
            BiomapperError::Config(format!(
                "cannot read reference index {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let mut records = Vec::new();
        for row in reader.deserialize::<ReferenceRow>() {
            let row = row
                .map_err(|e| BiomapperError::Config(format!("bad reference index row: {e}")))?;
            let synonyms: Vec<String> = row
                .synonyms
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            records.push(ReferenceRecord::new(row.id, row.name, synonyms));
        }
        debug!(n = records.len(), "Reference index loaded");
        Ok(Self { records })
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_record_precomputes_normalized_forms() {
        let r = ReferenceRecord::new("REF001", "HDL Cholesterol", vec!["HDL_C".to_string()]);
        assert_eq!(r.normalized_forms[0], "hdl cholesterol");
        assert_eq!(r.normalized_forms[1], "hdl cholesterol");
    }

    #[test]
    fn test_from_csv_path() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "id,name,synonyms").unwrap();
        writeln!(f, "REF001,Glucose,D-glucose|dextrose").unwrap();
        writeln!(f, "REF002,Triglycerides,").unwrap();
        let index = ReferenceIndex::from_csv_path(f.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.records()[0].synonyms.len(), 2);
        assert!(index.records()[1].synonyms.is_empty());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ReferenceIndex::from_csv_path("/nonexistent/ref.csv").unwrap_err();
        assert!(matches!(err, BiomapperError::Config(_)));
    }
}
