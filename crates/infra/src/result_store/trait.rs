use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rssformula_core::{FormulaId, JobKey, JobResult};

/// Result store operation error.
///
/// Infrastructure errors only. The batch records them against the job and
/// phase that hit them; they never abort a batch on their own.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("result already exists for {0}")]
    AlreadyExists(JobKey),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unsupported match fields: {0}")]
    UnsupportedMatch(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Columns an update can be matched on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchField {
    FilingId,
    FormulaId,
}

impl MatchField {
    /// Match on the full job identity.
    pub const JOB_KEY: [MatchField; 2] = [MatchField::FilingId, MatchField::FormulaId];

    pub fn column(&self) -> &'static str {
        match self {
            MatchField::FilingId => "filingId",
            MatchField::FormulaId => "formulaId",
        }
    }

    pub fn matches(&self, a: &JobResult, b: &JobResult) -> bool {
        match self {
            MatchField::FilingId => a.filing_id == b.filing_id,
            MatchField::FormulaId => a.formula_id == b.formula_id,
        }
    }
}

/// Insert/update statistic of one store call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertStat {
    pub table: String,
    pub inserted_count: u64,
    pub updated_count: u64,
}

impl UpsertStat {
    pub fn inserted(table: impl Into<String>, count: u64) -> Self {
        Self {
            table: table.into(),
            inserted_count: count,
            updated_count: 0,
        }
    }

    pub fn updated(table: impl Into<String>, count: u64) -> Self {
        Self {
            table: table.into(),
            inserted_count: 0,
            updated_count: count,
        }
    }
}

/// Persistence backend for job results, keyed by `{filingId, formulaId}`.
///
/// ## Contract
///
/// - `list_existing_keys` returns exactly the subset of `candidates` that has
///   a stored result (never keys outside `candidates`).
/// - `insert` is all-or-nothing per call and rejects keys that already exist.
/// - `update` replaces every stored record whose `match_fields` equal those of
///   an incoming record; unmatched records are not inserted.
/// - Writes are job-key scoped, so batches never conflict across jobs.
pub trait ResultStore: Send + Sync {
    fn list_existing_keys(
        &self,
        candidates: &[JobKey],
    ) -> Result<BTreeSet<JobKey>, ResultStoreError>;

    fn insert(&self, records: &[JobResult]) -> Result<UpsertStat, ResultStoreError>;

    fn update(
        &self,
        records: &[JobResult],
        match_fields: &[MatchField],
    ) -> Result<UpsertStat, ResultStoreError>;
}

impl<S> ResultStore for Arc<S>
where
    S: ResultStore + ?Sized,
{
    fn list_existing_keys(
        &self,
        candidates: &[JobKey],
    ) -> Result<BTreeSet<JobKey>, ResultStoreError> {
        (**self).list_existing_keys(candidates)
    }

    fn insert(&self, records: &[JobResult]) -> Result<UpsertStat, ResultStoreError> {
        (**self).insert(records)
    }

    fn update(
        &self,
        records: &[JobResult],
        match_fields: &[MatchField],
    ) -> Result<UpsertStat, ResultStoreError> {
        (**self).update(records, match_fields)
    }
}

/// A formula as registered in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaRecord {
    pub formula_id: FormulaId,
    /// File the formula was registered from, if any.
    pub file_name: Option<String>,
    /// Formula linkbase text.
    pub formula_linkbase: Option<String>,
    pub description: Option<String>,
}

/// Lookup of registered formulas by id.
pub trait FormulaCatalog: Send + Sync {
    fn get_formula(
        &self,
        formula_id: FormulaId,
    ) -> Result<Option<FormulaRecord>, ResultStoreError>;
}

impl<C> FormulaCatalog for Arc<C>
where
    C: FormulaCatalog + ?Sized,
{
    fn get_formula(
        &self,
        formula_id: FormulaId,
    ) -> Result<Option<FormulaRecord>, ResultStoreError> {
        (**self).get_formula(formula_id)
    }
}
