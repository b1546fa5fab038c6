//! NDJSON (Newline Delimited JSON) spool files
//!
//! Table writers spool every row as a self-describing JSON object so the
//! column set can keep growing until the table is closed.

use super::Row;

use eyre::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only NDJSON writer holding its file open
pub struct NdjsonWriter {
    path: PathBuf,
    file: BufWriter<File>,
    count: usize,
}

impl NdjsonWriter {
    /// Create (or truncate) the spool file, creating parent directories
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create spool directory: {}", parent.display())
            })?;
        }

        let file = File::create(&path)
            .with_context(|| format!("Failed to create NDJSON file: {}", path.display()))?;

        Ok(Self {
            path,
            file: BufWriter::new(file),
            count: 0,
        })
    }

    /// Append one row
    pub fn append(&mut self, row: &Row) -> Result<()> {
        serde_json::to_writer(&mut self.file, row)
            .with_context(|| format!("Failed to serialize row to {}", self.path.display()))?;
        writeln!(self.file)?;
        self.count += 1;
        Ok(())
    }

    /// Number of rows appended so far
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered rows and hand back the path for reading
    pub fn finish(mut self) -> Result<PathBuf> {
        self.file
            .flush()
            .with_context(|| format!("Failed to flush NDJSON file: {}", self.path.display()))?;
        Ok(self.path)
    }
}

/// Streaming NDJSON reader
pub struct NdjsonReader {
    path: PathBuf,
}

impl NdjsonReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Iterate rows lazily, skipping blank lines
    pub fn rows(&self) -> Result<impl Iterator<Item = Result<Row>> + '_> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to read NDJSON file: {}", self.path.display()))?;

        Ok(BufReader::new(file).lines().filter_map(move |line| {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(serde_json::from_str(&line).with_context(|| {
                    format!("Failed to parse JSON line in {}", self.path.display())
                })),
                Err(e) => Some(Err(e.into())),
            }
        }))
    }
}
