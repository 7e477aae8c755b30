//! Structured outcome of one job.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{FilingId, FormulaId};
use crate::job::JobKey;

/// Satisfied / not-satisfied counts of one value assertion.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionCounts {
    pub satisfied_count: u64,
    pub not_satisfied_count: u64,
}

impl AssertionCounts {
    pub fn new(satisfied_count: u64, not_satisfied_count: u64) -> Self {
        Self {
            satisfied_count,
            not_satisfied_count,
        }
    }
}

/// Terminal result record of one job. Never mutated after creation; the
/// result store decides whether it becomes an insert or an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub filing_id: FilingId,
    pub formula_id: FormulaId,
    pub is_inline_document: bool,
    pub output_document: Option<String>,
    pub assertion_results: BTreeMap<String, AssertionCounts>,
    pub processing_log: String,
    pub processed_at: DateTime<Utc>,
    pub errors: Option<String>,
    /// Engine attempts made for this job (1 when the first attempt settled it).
    #[serde(default)]
    pub attempts: u32,
}

impl JobResult {
    /// Result of a job that could not produce an engine outcome.
    ///
    /// Output and assertions are empty; `detail` becomes both the error and the log.
    pub fn failed(
        key: &JobKey,
        is_inline_document: bool,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        let detail = detail.into();
        Self {
            filing_id: key.filing_id.clone(),
            formula_id: key.formula_id,
            is_inline_document,
            output_document: None,
            assertion_results: BTreeMap::new(),
            processing_log: detail.clone(),
            processed_at: now_seconds(),
            errors: Some(detail),
            attempts,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.filing_id.clone(), self.formula_id)
    }

    pub fn is_failed(&self) -> bool {
        self.errors.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Assertion results as the JSON document stored in the results table.
    pub fn assertion_results_json(&self) -> Option<serde_json::Value> {
        if self.assertion_results.is_empty() {
            return None;
        }
        serde_json::to_value(&self.assertion_results).ok()
    }
}

/// Current time truncated to whole seconds (the store's resolution).
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
