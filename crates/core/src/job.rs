//! Job identity and the per-job lifecycle.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{FilingId, FormulaId};

/// Unique key of one (filing, formula) job.
///
/// A key's presence in the result store is the idempotence boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    pub filing_id: FilingId,
    pub formula_id: FormulaId,
}

impl JobKey {
    pub fn new(filing_id: FilingId, formula_id: FormulaId) -> Self {
        Self {
            filing_id,
            formula_id,
        }
    }
}

impl core::fmt::Display for JobKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "(filing {}, formula {})", self.filing_id, self.formula_id)
    }
}

/// How a finished job's result ended up in the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// Per-job state machine:
/// `New → Dispatched → Retrying(≤max) → {Succeeded | FailedPermanently}`,
/// then `{Inserted | Updated | Skipped}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    New,
    Dispatched,
    Retrying { retry: u32 },
    Succeeded,
    FailedPermanently { error: String },
    Persisted { outcome: PersistOutcome, succeeded: bool },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Persisted { .. })
    }

    pub fn dispatch(&self) -> Result<JobState, DomainError> {
        match self {
            JobState::New => Ok(JobState::Dispatched),
            other => Err(illegal(other, "dispatch")),
        }
    }

    /// Enter (or advance) the retry loop. `max_retries` bounds the count.
    pub fn retry(&self, max_retries: u32) -> Result<JobState, DomainError> {
        let next = match self {
            JobState::Dispatched => 1,
            JobState::Retrying { retry } => retry + 1,
            other => return Err(illegal(other, "retry")),
        };
        if next > max_retries {
            return Err(DomainError::invariant(format!(
                "retry {next} exceeds the bound of {max_retries}"
            )));
        }
        Ok(JobState::Retrying { retry: next })
    }

    pub fn succeed(&self) -> Result<JobState, DomainError> {
        match self {
            JobState::Dispatched | JobState::Retrying { .. } => Ok(JobState::Succeeded),
            other => Err(illegal(other, "succeed")),
        }
    }

    pub fn fail(&self, error: impl Into<String>) -> Result<JobState, DomainError> {
        match self {
            JobState::Dispatched | JobState::Retrying { .. } => Ok(JobState::FailedPermanently {
                error: error.into(),
            }),
            other => Err(illegal(other, "fail")),
        }
    }

    pub fn persist(&self, outcome: PersistOutcome) -> Result<JobState, DomainError> {
        match self {
            JobState::Succeeded => Ok(JobState::Persisted {
                outcome,
                succeeded: true,
            }),
            JobState::FailedPermanently { .. } => Ok(JobState::Persisted {
                outcome,
                succeeded: false,
            }),
            other => Err(illegal(other, "persist")),
        }
    }
}

fn illegal(state: &JobState, transition: &str) -> DomainError {
    DomainError::invariant(format!("cannot {transition} a job in state {state:?}"))
}
