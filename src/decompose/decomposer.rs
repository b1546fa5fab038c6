//! Generic entity decomposer
//!
//! Splits one nested record into its own flat row plus rows in child tables,
//! following the entity's static [`EntitySchema`].

use super::collector::ResultCollector;
use super::schema::{ChildRule, ChildTarget, EXTRACTION_TIME, EntitySchema, ROW_NR};
use crate::storage::{Record, TableArtifact, TableWriter, WriterOptions, render_cell};

use eyre::{Result, eyre};
use serde_json::Value;
use std::collections::HashSet;

/// Values injected into every row of a run
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    extraction_time: Option<String>,
}

impl WriteContext {
    pub fn new(extraction_time: impl Into<String>) -> Self {
        Self {
            extraction_time: Some(extraction_time.into()),
        }
    }

    /// A context that injects nothing besides keys
    pub fn without_extraction_time() -> Self {
        Self::default()
    }

    pub fn extraction_time(&self) -> Option<&str> {
        self.extraction_time.as_deref()
    }

    /// User values for a top-level entity row
    pub fn user_values(&self) -> Record {
        self.child_values(None)
    }

    fn child_values(&self, foreign_key: Option<(&str, &Value)>) -> Record {
        let mut values = Record::new();
        if let Some((column, id)) = foreign_key {
            values.insert(column.to_string(), id.clone());
        }
        if let Some(time) = &self.extraction_time {
            values.insert(EXTRACTION_TIME.to_string(), Value::String(time.clone()));
        }
        values
    }
}

/// Decomposers owned outside of any single entity tree, looked up by name
///
/// The run lends its shared writers for the duration of one write call.
#[derive(Default)]
pub struct SharedWriters<'a> {
    writers: Vec<&'a mut Decomposer>,
}

impl<'a> SharedWriters<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, decomposer: &'a mut Decomposer) -> Self {
        self.writers.push(decomposer);
        self
    }

    fn get(&mut self, entity: &str) -> Option<&mut Decomposer> {
        self.writers
            .iter_mut()
            .find(|d| d.name() == entity)
            .map(|d| &mut **d)
    }
}

enum ChildSink {
    Table(TableWriter),
    Entity(Box<Decomposer>),
    Shared {
        entity: &'static str,
        link_column: &'static str,
    },
}

struct ChildSlot {
    rule: &'static ChildRule,
    sink: ChildSink,
}

impl ChildSlot {
    fn collector(&self) -> Option<&dyn ResultCollector> {
        match &self.sink {
            ChildSink::Table(writer) => Some(writer),
            ChildSink::Entity(decomposer) => Some(decomposer.as_ref()),
            ChildSink::Shared { .. } => None,
        }
    }

    fn collector_mut(&mut self) -> Option<&mut dyn ResultCollector> {
        match &mut self.sink {
            ChildSink::Table(writer) => Some(writer),
            ChildSink::Entity(decomposer) => Some(decomposer.as_mut()),
            ChildSink::Shared { .. } => None,
        }
    }

    fn write(
        &mut self,
        value: Value,
        parent_id: Option<&Value>,
        remainder: &mut Record,
        ctx: &WriteContext,
        shared: &mut SharedWriters<'_>,
    ) -> Result<()> {
        let rule = self.rule;
        let foreign_key = match rule.foreign_key {
            Some(column) => {
                let id = parent_id.ok_or_else(|| {
                    eyre!("No parent key available for child field '{}'", rule.field)
                })?;
                Some((column, id))
            }
            None => None,
        };
        let user_values = ctx.child_values(foreign_key);

        match &mut self.sink {
            ChildSink::Shared {
                entity,
                link_column,
            } => {
                let (entity, link_column) = (*entity, *link_column);
                let Value::Object(child) = value else {
                    return Ok(());
                };
                if child.is_empty() {
                    return Ok(());
                }
                let link = child.get("id").cloned().unwrap_or(Value::Null);
                remainder.insert(link_column.to_string(), link);

                let writer = shared.get(entity).ok_or_else(|| {
                    eyre!(
                        "No shared '{}' writer registered for field '{}'",
                        entity,
                        rule.field
                    )
                })?;
                writer.write(child, &ctx.user_values(), ctx, &mut SharedWriters::none())
            }
            ChildSink::Table(writer) => {
                for element in child_records(value, rule)? {
                    writer.write(element, &user_values)?;
                }
                Ok(())
            }
            ChildSink::Entity(decomposer) => {
                for element in child_records(value, rule)? {
                    decomposer.write(element, &user_values, ctx, shared)?;
                }
                Ok(())
            }
        }
    }
}

/// Turn a nested field into child records, injecting `row_nr` when asked
fn child_records(value: Value, rule: &ChildRule) -> Result<Vec<Record>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(record) => vec![Value::Object(record)],
        other => eyre::bail!(
            "Expected a list of records in field '{}', got {}",
            rule.field,
            other
        ),
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let mut record = match item {
            Value::Object(record) => record,
            Value::Null => continue,
            scalar => {
                let mut record = Record::new();
                record.insert("value".to_string(), scalar);
                record
            }
        };
        if rule.positional {
            record.insert(ROW_NR.to_string(), Value::from(index));
        }
        records.push(record);
    }
    Ok(records)
}

/// Decomposes records of one entity type into its table and child tables
pub struct Decomposer {
    schema: &'static EntitySchema,
    writer: TableWriter,
    children: Vec<ChildSlot>,
    seen: HashSet<String>,
}

impl Decomposer {
    /// Build the writer tree for `schema`
    pub fn new(schema: &'static EntitySchema, options: &WriterOptions) -> Self {
        Self::build(schema, "", None, options)
    }

    fn build(
        schema: &'static EntitySchema,
        prefix: &str,
        parent_key: Option<&'static str>,
        options: &WriterOptions,
    ) -> Self {
        let mut primary_key: Vec<&str> = schema.primary_key.to_vec();
        if let Some(column) = parent_key {
            primary_key.push(column);
        }
        let writer = options.table_writer(&format!("{}{}", prefix, schema.name), &primary_key);

        let children = schema
            .children
            .iter()
            .map(|rule| {
                let sink = match &rule.target {
                    ChildTarget::Table { name, primary_key } => ChildSink::Table(
                        options.table_writer(&format!("{}{}", prefix, name), primary_key),
                    ),
                    ChildTarget::Entity {
                        schema: child,
                        prefix: child_prefix,
                    } => ChildSink::Entity(Box::new(Self::build(
                        *child,
                        &format!("{}{}", prefix, child_prefix),
                        rule.foreign_key,
                        options,
                    ))),
                    ChildTarget::Shared {
                        entity,
                        link_column,
                    } => ChildSink::Shared {
                        entity: *entity,
                        link_column: *link_column,
                    },
                };
                ChildSlot { rule, sink }
            })
            .collect();

        Self {
            schema,
            writer,
            children,
            seen: HashSet::new(),
        }
    }

    /// Table name of the entity itself
    pub fn name(&self) -> &str {
        self.writer.name()
    }

    /// Rows written to the entity's own table
    pub fn rows_written(&self) -> usize {
        self.writer.rows_written()
    }

    /// Names of every table in this tree, children first
    pub fn table_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for slot in &self.children {
            match &slot.sink {
                ChildSink::Table(writer) => names.push(writer.name().to_string()),
                ChildSink::Entity(decomposer) => names.extend(decomposer.table_names()),
                ChildSink::Shared { .. } => {}
            }
        }
        names.push(self.name().to_string());
        names
    }

    /// Decompose one record
    ///
    /// An empty record is skipped entirely. Declared child fields are handed
    /// to their child writers; everything else is written as the entity row
    /// together with `user_values`.
    ///
    /// # Errors
    /// Returns an error if the record lacks the key its children need, a
    /// child field is not a list of records, or a writer fails.
    pub fn write(
        &mut self,
        record: Record,
        user_values: &Record,
        ctx: &WriteContext,
        shared: &mut SharedWriters<'_>,
    ) -> Result<()> {
        if record.is_empty() {
            log::trace!("Skipping empty '{}' record", self.name());
            return Ok(());
        }

        if self.schema.dedupe {
            let key = self
                .schema
                .primary_key
                .iter()
                .map(|column| render_cell(record.get(*column)))
                .collect::<Vec<_>>()
                .join("|");
            if !key.is_empty() && !self.seen.insert(key) {
                log::debug!("Skipping duplicate '{}' record", self.name());
                return Ok(());
            }
        }

        let parent_id = if self.schema.needs_parent_key() {
            let column = self.schema.key_column();
            match record.get(column) {
                Some(Value::Null) | None => eyre::bail!(
                    "Record for table '{}' is missing its '{}' field",
                    self.name(),
                    column
                ),
                Some(id) => Some(id.clone()),
            }
        } else {
            None
        };

        let mut nested: Vec<Option<Value>> = self.children.iter().map(|_| None).collect();
        let mut remainder = Record::new();
        for (field, value) in record {
            match self.children.iter().position(|c| c.rule.field == field) {
                Some(index) => nested[index] = Some(value),
                None => {
                    remainder.insert(field, value);
                }
            }
        }

        for (slot, value) in self.children.iter_mut().zip(nested) {
            if let Some(value) = value {
                slot.write(value, parent_id.as_ref(), &mut remainder, ctx, shared)?;
            }
        }

        self.writer.write(remainder, user_values)
    }

    /// Decompose a raw JSON value: null is a no-op, an array is a sequence
    /// of records
    ///
    /// Returns how many top-level records were handed to [`Decomposer::write`]
    pub fn write_value(
        &mut self,
        value: Value,
        user_values: &Record,
        ctx: &WriteContext,
        shared: &mut SharedWriters<'_>,
    ) -> Result<usize> {
        match value {
            Value::Null => Ok(0),
            Value::Object(record) => self.write(record, user_values, ctx, shared).map(|_| 1),
            Value::Array(items) => {
                let mut count = 0;
                for item in items {
                    count += self.write_value(item, user_values, ctx, shared)?;
                }
                Ok(count)
            }
            other => eyre::bail!("Expected a '{}' record, got {}", self.name(), other),
        }
    }
}

impl ResultCollector for Decomposer {
    fn close(&mut self) -> Result<()> {
        for slot in &mut self.children {
            if let Some(child) = slot.collector_mut() {
                child.close()?;
            }
        }
        self.writer.close()
    }

    fn discard(&mut self) -> Result<()> {
        for slot in &mut self.children {
            if let Some(child) = slot.collector_mut() {
                child.discard()?;
            }
        }
        self.writer.discard()
    }

    fn collect_results(&self) -> Result<Vec<TableArtifact>> {
        let mut results = Vec::new();
        for slot in &self.children {
            if let Some(child) = slot.collector() {
                results.extend(child.collect_results()?);
            }
        }
        results.extend(self.writer.collect_results()?);
        Ok(results)
    }
}
