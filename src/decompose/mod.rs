//! Nested entity decomposition
//!
//! Turns deeply nested API records into a stable set of flat tables linked
//! by injected foreign keys. The rules for each entity are static data
//! ([`EntitySchema`]); a single generic [`Decomposer`] interprets them.

mod collector;
mod decomposer;
mod schema;

pub use collector::{ResultCollector, collect_all};
pub use decomposer::{Decomposer, SharedWriters, WriteContext};
pub use schema::{ChildRule, ChildTarget, EXTRACTION_TIME, EntitySchema, ROW_NR};
