//! The resolved formula package shared read-only by every job of a batch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::id::FormulaId;

/// A formula materialised as one on-disk artifact the engine can import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaPackage {
    pub formula_id: FormulaId,
    /// File handed to the engine.
    pub artifact_path: PathBuf,
    /// Canonical content of the artifact.
    pub raw_content: Option<Vec<u8>>,
    /// Caller-supplied file the formula came from, if any.
    pub provenance: Option<PathBuf>,
    /// `true` when `artifact_path` was generated for this batch.
    pub is_temporary: bool,
}

impl FormulaPackage {
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Name reported for the formula: the caller's file if any, else the artifact.
    pub fn file_name(&self) -> &Path {
        self.provenance.as_deref().unwrap_or(&self.artifact_path)
    }

    /// Remove a generated artifact. Caller-owned files are never touched.
    pub fn cleanup(&self) -> std::io::Result<bool> {
        if !self.is_temporary {
            return Ok(false);
        }
        match std::fs::remove_file(&self.artifact_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
