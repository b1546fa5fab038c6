//! Table manifests written next to every produced table
//!
//! A manifest describes how a table should be loaded downstream:
//!
//! ```json
//! {
//!   "destination": "in.c-shopify.order",
//!   "incremental": true,
//!   "primary_key": ["id"]
//! }
//! ```
//!
//! Sliced tables carry no header, so their manifest also lists the columns.

use super::table::TableArtifact;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    pub destination: String,
    pub incremental: bool,
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

impl TableManifest {
    pub fn for_artifact(artifact: &TableArtifact, incremental: bool) -> Self {
        Self {
            destination: artifact.table_def.destination.clone(),
            incremental,
            primary_key: artifact.table_def.primary_key.clone(),
            columns: artifact
                .sliced
                .then(|| artifact.table_def.columns.clone()),
        }
    }

    /// Manifest path for a table: `<full_path>.manifest`
    pub fn path_for(artifact: &TableArtifact) -> PathBuf {
        let mut path = artifact.full_path.clone().into_os_string();
        path.push(".manifest");
        PathBuf::from(path)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read table manifest: {}", path.as_ref().display())
        })?;
        serde_json::from_str(&content).with_context(|| "Failed to parse table manifest")
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json).with_context(|| {
            format!(
                "Failed to write table manifest: {}",
                path.as_ref().display()
            )
        })
    }
}

/// Write a manifest for every artifact, returning the manifest paths
pub fn write_manifests(artifacts: &[TableArtifact], incremental: bool) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(artifacts.len());

    for artifact in artifacts {
        let path = TableManifest::path_for(artifact);
        TableManifest::for_artifact(artifact, incremental).write(&path)?;
        log::debug!("Wrote manifest {}", path.display());
        paths.push(path);
    }

    Ok(paths)
}
