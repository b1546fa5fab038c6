//! Persisted extractor state
//!
//! The state carries two things between runs: the last known column list of
//! every produced table (so schemas only ever grow) and the upper bound of the
//! last successful extraction per resource.
//!
//! Example `state.json`:
//! ```json
//! {
//!   "table_columns": {
//!     "order.csv": ["id", "email", "extraction_time"]
//!   },
//!   "cursors": {
//!     "orders": "2024-03-01T00:00:00+00:00"
//!   }
//! }
//! ```

use super::table::TableArtifact;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What happens to the schema of a table that produced no output this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaRetention {
    /// New state holds exactly the schemas produced this run
    #[default]
    Overwrite,
    /// Schemas of tables that stayed empty this run are carried over
    Retain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorState {
    /// Ordered column list per table file name
    #[serde(default)]
    pub table_columns: BTreeMap<String, Vec<String>>,
    /// Upper bound (RFC 3339) of the last successful extraction per resource
    #[serde(default)]
    pub cursors: BTreeMap<String, String>,
}

impl ExtractorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self, resource: &str) -> Option<&str> {
        self.cursors.get(resource).map(|s| s.as_str())
    }

    pub fn set_cursor(&mut self, resource: impl Into<String>, value: impl Into<String>) {
        self.cursors.insert(resource.into(), value.into());
    }

    /// Build the schema part of the next state from this run's artifacts
    ///
    /// Writers start from the prior columns and only append, so each
    /// artifact's column list is already a superset of its prior entry.
    pub fn reconcile(&self, artifacts: &[TableArtifact], retention: SchemaRetention) -> Self {
        let mut table_columns = match retention {
            SchemaRetention::Overwrite => BTreeMap::new(),
            SchemaRetention::Retain => self.table_columns.clone(),
        };

        for artifact in artifacts {
            table_columns.insert(artifact.file_name(), artifact.table_def.columns.clone());
        }

        if retention == SchemaRetention::Overwrite {
            for dropped in self
                .table_columns
                .keys()
                .filter(|name| !table_columns.contains_key(*name))
            {
                log::debug!("Dropping schema of '{}' from state, no output this run", dropped);
            }
        }

        Self {
            table_columns,
            cursors: self.cursors.clone(),
        }
    }
}

/// Key-value store holding the extractor state between runs
pub trait StateStore {
    /// Read the stored state, empty if nothing was stored yet
    fn read(&self) -> Result<ExtractorState>;

    /// Replace the stored state
    fn write(&self, state: &ExtractorState) -> Result<()>;
}

/// State stored as a pretty-printed JSON file
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateFile {
    fn read(&self) -> Result<ExtractorState> {
        if !self.path.exists() {
            log::debug!("No state file at {}, starting fresh", self.path.display());
            return Ok(ExtractorState::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(ExtractorState::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))
    }

    fn write(&self, state: &ExtractorState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        log::debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableDefinition;
    use tempfile::TempDir;

    fn artifact(name: &str, columns: &[&str]) -> TableArtifact {
        let table = TableDefinition::new(name, &["id"])
            .with_columns(columns.iter().map(|c| c.to_string()).collect());
        TableArtifact::new(format!("/out/{}.csv", name), table, false)
    }

    fn prior() -> ExtractorState {
        let mut state = ExtractorState::new();
        state
            .table_columns
            .insert("order.csv".to_string(), vec!["id".into(), "total".into()]);
        state
            .table_columns
            .insert("order_tax_lines.csv".to_string(), vec!["rate".into()]);
        state.set_cursor("orders", "2024-01-01T00:00:00+00:00");
        state
    }

    #[test]
    fn test_reconcile_overwrite() {
        let next = prior().reconcile(
            &[artifact("order", &["id", "total", "new_field"])],
            SchemaRetention::Overwrite,
        );

        assert_eq!(next.table_columns.len(), 1);
        assert_eq!(
            next.table_columns["order.csv"],
            vec!["id", "total", "new_field"]
        );
        assert!(!next.table_columns.contains_key("order_tax_lines.csv"));
        assert_eq!(next.cursor("orders"), Some("2024-01-01T00:00:00+00:00"));
    }

    #[test]
    fn test_reconcile_retain() {
        let next = prior().reconcile(
            &[artifact("order", &["id", "total", "new_field"])],
            SchemaRetention::Retain,
        );

        assert_eq!(next.table_columns.len(), 2);
        assert_eq!(next.table_columns["order_tax_lines.csv"], vec!["rate"]);
    }

    #[test]
    fn test_json_state_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = JsonStateFile::new(temp.path().join("state").join("state.json"));

        assert_eq!(store.read().unwrap(), ExtractorState::new());

        let state = prior();
        store.write(&state).unwrap();
        assert_eq!(store.read().unwrap(), state);
    }

    #[test]
    fn test_state_tolerates_missing_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, r#"{"table_columns": {"product.csv": ["id"]}}"#).unwrap();

        let state = JsonStateFile::new(&path).read().unwrap();
        assert_eq!(state.table_columns["product.csv"], vec!["id"]);
        assert!(state.cursors.is_empty());
    }
}
