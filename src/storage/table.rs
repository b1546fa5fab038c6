//! Table definitions and the artifacts produced by closed writers

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Schema of one flat output table
///
/// `columns` is an ordered set: columns from a previous run come first and
/// columns first seen during this run are appended in the order they appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<String>,
    pub destination: String,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            columns: Vec::new(),
            destination: String::new(),
        }
    }

    /// Seed the column set with columns known from a previous run
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    /// File name the table is persisted under, also the key used in state
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Append a column if it is not known yet
    ///
    /// Returns true if the column was new
    pub fn add_column(&mut self, column: &str) -> bool {
        if self.has_column(column) {
            false
        } else {
            self.columns.push(column.to_string());
            true
        }
    }
}

/// Physical layout of a finished table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// One CSV file with a header row
    #[default]
    Single,
    /// A directory of header-less CSV slices, each holding at most
    /// `rows_per_slice` rows
    Sliced { rows_per_slice: usize },
}

impl OutputLayout {
    pub fn from_slice_rows(slice_rows: Option<usize>) -> Self {
        match slice_rows {
            Some(rows_per_slice) if rows_per_slice > 0 => Self::Sliced { rows_per_slice },
            _ => Self::Single,
        }
    }

    pub fn is_sliced(&self) -> bool {
        matches!(self, Self::Sliced { .. })
    }
}

/// The finalized output of one table writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableArtifact {
    /// A CSV file, or a directory of slices when `sliced` is set
    pub full_path: PathBuf,
    pub table_def: TableDefinition,
    pub sliced: bool,
}

impl TableArtifact {
    pub fn new(full_path: impl AsRef<Path>, table_def: TableDefinition, sliced: bool) -> Self {
        Self {
            full_path: full_path.as_ref().to_path_buf(),
            table_def,
            sliced,
        }
    }

    pub fn file_name(&self) -> String {
        self.table_def.file_name()
    }
}
