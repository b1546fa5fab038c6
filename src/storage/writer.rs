//! Table writer: one flat output table with a growing schema
//!
//! Rows are spooled as self-describing NDJSON while the run is in progress.
//! Closing the writer renders the spool into CSV under a temporary name and
//! renames it into place, so a table is either complete or absent.

use super::flatten::RowFlattener;
use super::ndjson::{NdjsonReader, NdjsonWriter};
use super::table::{OutputLayout, TableArtifact, TableDefinition};
use super::{Record, Row};
use crate::etl::Transformer;

use eyre::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Directory (relative to the output directory) holding in-progress spools
pub const STAGING_DIR: &str = ".staging";

/// Settings shared by every table writer of a run
#[derive(Debug, Clone)]
pub struct WriterOptions {
    out_dir: PathBuf,
    layout: OutputLayout,
    fix_headers: bool,
    destination_bucket: Option<String>,
    known_columns: BTreeMap<String, Vec<String>>,
}

impl WriterOptions {
    pub fn new(out_dir: impl AsRef<Path>) -> Self {
        Self {
            out_dir: out_dir.as_ref().to_path_buf(),
            layout: OutputLayout::Single,
            fix_headers: true,
            destination_bucket: None,
            known_columns: BTreeMap::new(),
        }
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    /// When disabled, a row may not introduce columns once the schema is set
    pub fn with_fix_headers(mut self, fix_headers: bool) -> Self {
        self.fix_headers = fix_headers;
        self
    }

    /// Destination tables become `<bucket>.<table name>`
    pub fn with_destination_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.destination_bucket = Some(bucket.into());
        self
    }

    /// Column lists from a previous run, keyed by table file name
    pub fn with_known_columns(mut self, known_columns: BTreeMap<String, Vec<String>>) -> Self {
        self.known_columns = known_columns;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    /// Build a writer for a table, seeded with the columns known from state
    pub fn table_writer(&self, name: &str, primary_key: &[&str]) -> TableWriter {
        let mut table = TableDefinition::new(name, primary_key);
        if let Some(columns) = self.known_columns.get(&table.file_name()) {
            table.columns = columns.clone();
        }
        if let Some(bucket) = &self.destination_bucket {
            table.destination = format!("{}.{}", bucket, name);
        }
        TableWriter::new(table, self)
    }
}

enum WriterState {
    Open,
    Closed(Option<TableArtifact>),
}

/// Writer for a single flat table
pub struct TableWriter {
    table: TableDefinition,
    known: HashSet<String>,
    out_dir: PathBuf,
    layout: OutputLayout,
    fix_headers: bool,
    flattener: RowFlattener,
    spool: Option<NdjsonWriter>,
    rows: usize,
    state: WriterState,
}

impl TableWriter {
    pub fn new(table: TableDefinition, options: &WriterOptions) -> Self {
        let known = table.columns.iter().cloned().collect();
        Self {
            table,
            known,
            out_dir: options.out_dir.clone(),
            layout: options.layout,
            fix_headers: options.fix_headers,
            flattener: RowFlattener::default(),
            spool: None,
            rows: 0,
            state: WriterState::Open,
        }
    }

    pub fn table(&self) -> &TableDefinition {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    /// Rows written so far in this run
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    /// Final location of the table
    pub fn full_path(&self) -> PathBuf {
        self.out_dir.join(self.table.file_name())
    }

    fn staging_path(&self) -> PathBuf {
        self.out_dir
            .join(STAGING_DIR)
            .join(format!("{}.ndjson", self.table.name))
    }

    /// Merge `user_values` into `row` and append it to the table
    ///
    /// # Errors
    /// Returns an error if the writer is closed, the row lacks a primary key
    /// column, or the row brings a new column while headers are fixed.
    pub fn write(&mut self, row: Record, user_values: &Record) -> Result<()> {
        if let WriterState::Closed(_) = self.state {
            eyre::bail!("Table '{}' is already closed", self.table.name);
        }

        let mut row = row;
        for (key, value) in user_values {
            row.insert(key.clone(), value.clone());
        }
        let row: Row = self.flattener.transform(row)?;

        for key in &self.table.primary_key {
            if matches!(row.get(key), None | Some(Value::Null)) {
                eyre::bail!(
                    "Row for table '{}' is missing primary key column '{}'",
                    self.table.name,
                    key
                );
            }
        }

        let locked = !self.fix_headers && !self.table.columns.is_empty();
        for column in row.keys() {
            if self.known.contains(column) {
                continue;
            }
            if locked {
                eyre::bail!(
                    "Column '{}' is not part of the fixed header of table '{}'",
                    column,
                    self.table.name
                );
            }
            log::debug!("Table '{}' gained column '{}'", self.table.name, column);
            self.known.insert(column.clone());
            self.table.add_column(column);
        }

        if self.spool.is_none() {
            self.spool = Some(NdjsonWriter::create(self.staging_path())?);
        }
        if let Some(spool) = self.spool.as_mut() {
            spool.append(&row)?;
        }
        self.rows += 1;

        Ok(())
    }

    /// Write every row of a sequence, returning how many were written
    pub fn write_all(
        &mut self,
        rows: impl IntoIterator<Item = Record>,
        user_values: &Record,
    ) -> Result<usize> {
        let mut count = 0;
        for row in rows {
            self.write(row, user_values)?;
            count += 1;
        }
        Ok(count)
    }

    /// Write a raw JSON value: null is a no-op, an object is one row and an
    /// array is a sequence of rows
    pub fn write_value(&mut self, value: Value, user_values: &Record) -> Result<usize> {
        match value {
            Value::Null => Ok(0),
            Value::Object(row) => self.write(row, user_values).map(|_| 1),
            Value::Array(items) => {
                let mut count = 0;
                for item in items {
                    count += self.write_value(item, user_values)?;
                }
                Ok(count)
            }
            other => eyre::bail!(
                "Expected a record for table '{}', got {}",
                self.table.name,
                other
            ),
        }
    }

    /// Flush the spool into its final layout
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if let WriterState::Closed(_) = self.state {
            return Ok(());
        }

        let artifact = match self.spool.take() {
            None => {
                log::debug!("Table '{}' received no rows, skipping", self.table.name);
                None
            }
            Some(spool) => {
                let rows = spool.count();
                let spool_path = spool.finish()?;
                let artifact = self.render(&spool_path)?;
                std::fs::remove_file(&spool_path).with_context(|| {
                    format!("Failed to remove spool file: {}", spool_path.display())
                })?;
                log::info!(
                    "Wrote {} row(s) to {}",
                    rows,
                    artifact.full_path.display()
                );
                Some(artifact)
            }
        };

        // Only succeeds once every table has left the staging directory
        let _ = std::fs::remove_dir(self.out_dir.join(STAGING_DIR));

        self.state = WriterState::Closed(artifact);
        Ok(())
    }

    /// Drop everything written so far without producing output
    pub fn discard(&mut self) -> Result<()> {
        if let Some(spool) = self.spool.take() {
            let path = spool.path().to_path_buf();
            drop(spool);
            if path.exists() {
                std::fs::remove_file(&path).with_context(|| {
                    format!("Failed to remove spool file: {}", path.display())
                })?;
            }
            log::debug!("Discarded spooled rows of table '{}'", self.table.name);
            let _ = std::fs::remove_dir(self.out_dir.join(STAGING_DIR));
        }
        self.state = WriterState::Closed(None);
        Ok(())
    }

    /// Artifacts produced by this writer: none when no row was written
    ///
    /// # Errors
    /// Returns an error if the writer has not been closed yet
    pub fn collect_results(&self) -> Result<Vec<TableArtifact>> {
        match &self.state {
            WriterState::Open => eyre::bail!(
                "Table '{}' must be closed before collecting results",
                self.table.name
            ),
            WriterState::Closed(artifact) => Ok(artifact.iter().cloned().collect()),
        }
    }

    fn render(&self, spool_path: &Path) -> Result<TableArtifact> {
        let target = self.full_path();
        let temp = self
            .out_dir
            .join(format!("{}.tmp", self.table.file_name()));
        remove_path(&temp)?;

        let reader = NdjsonReader::new(spool_path);
        match self.layout {
            OutputLayout::Single => {
                let mut csv = csv::Writer::from_path(&temp)
                    .with_context(|| format!("Failed to create {}", temp.display()))?;
                csv.write_record(&self.table.columns)?;
                for row in reader.rows()? {
                    csv.write_record(self.cells(&row?))?;
                }
                csv.flush()?;
            }
            OutputLayout::Sliced { rows_per_slice } => {
                std::fs::create_dir_all(&temp)
                    .with_context(|| format!("Failed to create {}", temp.display()))?;
                let mut csv: Option<csv::Writer<std::fs::File>> = None;
                for (index, row) in reader.rows()?.enumerate() {
                    if index % rows_per_slice == 0 {
                        if let Some(mut done) = csv.take() {
                            done.flush()?;
                        }
                        let slice = temp.join(format!("slice_{:04}.csv", index / rows_per_slice));
                        csv = Some(csv::Writer::from_path(&slice).with_context(|| {
                            format!("Failed to create slice {}", slice.display())
                        })?);
                    }
                    if let Some(writer) = csv.as_mut() {
                        writer.write_record(self.cells(&row?))?;
                    }
                }
                if let Some(mut done) = csv {
                    done.flush()?;
                }
            }
        }

        remove_path(&target)?;
        std::fs::rename(&temp, &target).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                temp.display(),
                target.display()
            )
        })?;

        Ok(TableArtifact::new(
            target,
            self.table.clone(),
            self.layout.is_sliced(),
        ))
    }

    fn cells(&self, row: &Row) -> Vec<String> {
        self.table
            .columns
            .iter()
            .map(|column| render_cell(row.get(column)))
            .collect()
    }
}

/// Render a JSON value as a CSV cell
pub fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    } else if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_header_is_union_in_first_seen_order() {
        let temp = TempDir::new().unwrap();
        let options = WriterOptions::new(temp.path());
        let mut writer = options.table_writer("order", &["id"]);

        writer
            .write(record(json!({"id": 1, "name": "#1"})), &Record::new())
            .unwrap();
        writer
            .write(record(json!({"id": 2, "note": "gift"})), &Record::new())
            .unwrap();
        writer.close().unwrap();

        let results = writer.collect_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].table_def.columns, vec!["id", "name", "note"]);

        let rows = read_csv(&temp.path().join("order.csv"));
        assert_eq!(rows[0], vec!["id", "name", "note"]);
        assert_eq!(rows[1], vec!["1", "#1", ""]);
        assert_eq!(rows[2], vec!["2", "", "gift"]);
    }

    #[test]
    fn test_prior_columns_come_first() {
        let temp = TempDir::new().unwrap();
        let mut known = BTreeMap::new();
        known.insert(
            "order.csv".to_string(),
            vec!["id".to_string(), "total".to_string()],
        );
        let options = WriterOptions::new(temp.path()).with_known_columns(known);
        let mut writer = options.table_writer("order", &["id"]);

        writer
            .write(
                record(json!({"new_field": "x", "id": 1, "total": "9.99"})),
                &Record::new(),
            )
            .unwrap();
        writer.close().unwrap();

        let results = writer.collect_results().unwrap();
        assert_eq!(
            results[0].table_def.columns,
            vec!["id", "total", "new_field"]
        );
    }

    #[test]
    fn test_empty_table_produces_nothing() {
        let temp = TempDir::new().unwrap();
        let mut writer = WriterOptions::new(temp.path()).table_writer("order_tax_lines", &["id"]);

        assert_eq!(writer.write_value(Value::Null, &Record::new()).unwrap(), 0);
        assert_eq!(writer.write_value(json!([]), &Record::new()).unwrap(), 0);
        writer.close().unwrap();

        assert!(writer.collect_results().unwrap().is_empty());
        assert!(!temp.path().join("order_tax_lines.csv").exists());
    }

    #[test]
    fn test_collect_before_close_fails() {
        let temp = TempDir::new().unwrap();
        let writer = WriterOptions::new(temp.path()).table_writer("order", &["id"]);
        assert!(writer.collect_results().is_err());
    }

    #[test]
    fn test_close_is_idempotent_and_atomic() {
        let temp = TempDir::new().unwrap();
        let mut writer = WriterOptions::new(temp.path()).table_writer("product", &["id"]);
        writer
            .write(record(json!({"id": 5})), &Record::new())
            .unwrap();

        // Nothing visible under the final name until close
        assert!(!temp.path().join("product.csv").exists());

        writer.close().unwrap();
        writer.close().unwrap();
        assert!(temp.path().join("product.csv").exists());
        assert!(!temp.path().join(STAGING_DIR).exists());
        assert_eq!(writer.collect_results().unwrap().len(), 1);
        assert!(writer
            .write(record(json!({"id": 6})), &Record::new())
            .is_err());
    }

    #[test]
    fn test_user_values_are_merged() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            WriterOptions::new(temp.path()).table_writer("line_item", &["id", "order_id"]);
        let mut user_values = Record::new();
        user_values.insert("order_id".to_string(), json!(1));
        user_values.insert("extraction_time".to_string(), json!("2024-01-01T00:00:00Z"));

        let written = writer
            .write_value(json!([{"id": 10}, {"id": 11}]), &user_values)
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(writer.rows_written(), 2);
        assert_eq!(
            writer.table().columns,
            vec!["id", "order_id", "extraction_time"]
        );
    }

    #[test]
    fn test_missing_primary_key_is_fatal() {
        let temp = TempDir::new().unwrap();
        let mut writer =
            WriterOptions::new(temp.path()).table_writer("line_item", &["id", "order_id"]);
        let err = writer
            .write(record(json!({"id": 10})), &Record::new())
            .unwrap_err();
        assert!(err.to_string().contains("order_id"));
    }

    #[test]
    fn test_fixed_headers_reject_new_columns() {
        let temp = TempDir::new().unwrap();
        let mut writer = WriterOptions::new(temp.path())
            .with_fix_headers(false)
            .table_writer("event", &["id"]);

        writer
            .write(record(json!({"id": 1, "verb": "create"})), &Record::new())
            .unwrap();
        let err = writer
            .write(record(json!({"id": 2, "author": "x"})), &Record::new())
            .unwrap_err();
        assert!(err.to_string().contains("author"));
    }

    #[test]
    fn test_sliced_layout() {
        let temp = TempDir::new().unwrap();
        let mut writer = WriterOptions::new(temp.path())
            .with_layout(OutputLayout::Sliced { rows_per_slice: 2 })
            .table_writer("customer", &["id"]);

        for id in 0..5 {
            writer
                .write(record(json!({"id": id})), &Record::new())
                .unwrap();
        }
        writer.close().unwrap();

        let results = writer.collect_results().unwrap();
        assert!(results[0].sliced);
        let dir = temp.path().join("customer.csv");
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 3);
        assert_eq!(read_csv(&dir.join("slice_0000.csv")), vec![vec!["0"], vec!["1"]]);
        assert_eq!(read_csv(&dir.join("slice_0002.csv")), vec![vec!["4"]]);
    }

    #[test]
    fn test_discard_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let mut writer = WriterOptions::new(temp.path()).table_writer("order", &["id"]);
        writer
            .write(record(json!({"id": 1})), &Record::new())
            .unwrap();
        writer.discard().unwrap();

        assert!(writer.collect_results().unwrap().is_empty());
        assert!(!temp.path().join("order.csv").exists());
        assert!(!temp.path().join(STAGING_DIR).join("order.ndjson").exists());
    }

    #[test]
    fn test_render_cell() {
        assert_eq!(render_cell(None), "");
        assert_eq!(render_cell(Some(&Value::Null)), "");
        assert_eq!(render_cell(Some(&json!("a"))), "a");
        assert_eq!(render_cell(Some(&json!(true))), "true");
        assert_eq!(render_cell(Some(&json!(0.2))), "0.2");
        assert_eq!(render_cell(Some(&json!(["x", 1]))), "[\"x\",1]");
    }
}
