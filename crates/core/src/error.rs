//! Error model shared by every crate in the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures of domain values (malformed ids, illegal state
/// transitions). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Errors that stop a batch before any job runs.
///
/// Everything else (engine, persistence, export) is recorded against its job
/// and phase in the batch report instead.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Missing or contradictory formula source.
    #[error("input error: {0}")]
    Input(String),

    /// Invalid batch preconditions (formula id, empty job set, export folder,
    /// unreadable result store).
    #[error("fatal batch error: {0}")]
    Fatal(String),

    /// I/O failure while staging the formula artifact.
    #[error("formula artifact i/o error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BatchError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, BatchError::Input(_) | BatchError::Io { .. })
    }
}

/// Pipeline phase a per-job error is recorded against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorPhase {
    #[serde(rename = "formulaProcessing")]
    FormulaProcessing,
    #[serde(rename = "dbInsert")]
    DbInsert,
    #[serde(rename = "dbUpdate")]
    DbUpdate,
    #[serde(rename = "saveFiles")]
    SaveFiles,
}

impl ErrorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPhase::FormulaProcessing => "formulaProcessing",
            ErrorPhase::DbInsert => "dbInsert",
            ErrorPhase::DbUpdate => "dbUpdate",
            ErrorPhase::SaveFiles => "saveFiles",
        }
    }
}

impl core::fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
