//! File system storage operations
//!
//! This module handles all file I/O of an extraction run:
//! - Flat table writers with growing schemas
//! - NDJSON spooling of in-progress tables
//! - Table manifests
//! - Persisted extractor state

mod flatten;
mod manifest;
mod ndjson;
mod state;
mod table;
mod writer;

use serde_json::{Map, Value};

/// An open, ordered map of field name to JSON value, as returned by the API
pub type Record = Map<String, Value>;

/// A record flattened to one level, ready to become a table row
pub type Row = Map<String, Value>;

pub use flatten::{CHILD_SEPARATOR, RowFlattener};
pub use manifest::{TableManifest, write_manifests};
pub use ndjson::{NdjsonReader, NdjsonWriter};
pub use state::{ExtractorState, JsonStateFile, SchemaRetention, StateStore};
pub use table::{OutputLayout, TableArtifact, TableDefinition};
pub use writer::{STAGING_DIR, TableWriter, WriterOptions, render_cell};
