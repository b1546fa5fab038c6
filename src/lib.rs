//! Shopify Extractor
//!
//! Extracts Shopify Admin API resources over a date range and flattens their
//! nested records into a stable set of linked CSV tables.

pub mod cli;
pub mod client;
pub mod config;
pub mod decompose;
pub mod etl;
pub mod run;
pub mod shopify;
pub mod storage;

// Re-exports for convenience
pub use client::{Auth, AuthType, ShopifyClient};
pub use decompose::{Decomposer, EntitySchema, ResultCollector, WriteContext};
pub use etl::{Extractor, Loader, Pipeline, Transformer};
pub use run::{ExtractionRun, RunSummary};
pub use shopify::{Resource, WindowedExtractor};
pub use storage::{ExtractorState, JsonStateFile, StateStore, TableWriter, WriterOptions};
