//! Collection of produced table artifacts across writer trees

use crate::storage::{TableArtifact, TableWriter};

use eyre::Result;

/// Lifecycle shared by table writers and writer trees
pub trait ResultCollector {
    /// Flush everything written so far into final outputs
    fn close(&mut self) -> Result<()>;

    /// Drop everything written so far without producing outputs
    fn discard(&mut self) -> Result<()>;

    /// Artifacts of a closed writer tree, children before their owner
    fn collect_results(&self) -> Result<Vec<TableArtifact>>;
}

impl ResultCollector for TableWriter {
    fn close(&mut self) -> Result<()> {
        TableWriter::close(self)
    }

    fn discard(&mut self) -> Result<()> {
        TableWriter::discard(self)
    }

    fn collect_results(&self) -> Result<Vec<TableArtifact>> {
        TableWriter::collect_results(self)
    }
}

/// Concatenate the artifacts of several closed writer trees, in order
pub fn collect_all<'a>(
    collectors: impl IntoIterator<Item = &'a dyn ResultCollector>,
) -> Result<Vec<TableArtifact>> {
    let mut results = Vec::new();
    for collector in collectors {
        results.extend(collector.collect_results()?);
    }
    Ok(results)
}
