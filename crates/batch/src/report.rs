//! Consolidated outcome of one batch.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use rssformula_core::{ErrorPhase, FormulaPackage, JobKey, JobResult, PersistOutcome, RunId};
use rssformula_infra::UpsertStat;

/// One error recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseError {
    pub job: JobKey,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub run_id: RunId,
    pub formula: FormulaPackage,
    pub new_jobs: Vec<JobKey>,
    pub existing_jobs: Vec<JobKey>,
    pub jobs_to_run: Vec<JobKey>,
    /// Candidates dropped as duplicates during planning.
    pub duplicates: usize,
    /// Empty when the batch was asked not to return results.
    pub results: BTreeMap<JobKey, JobResult>,
    pub outcomes: BTreeMap<JobKey, PersistOutcome>,
    pub stats: Vec<UpsertStat>,
    pub errors: BTreeMap<ErrorPhase, Vec<PhaseError>>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn new(run_id: RunId, formula: FormulaPackage) -> Self {
        Self {
            run_id,
            formula,
            new_jobs: Vec::new(),
            existing_jobs: Vec::new(),
            jobs_to_run: Vec::new(),
            duplicates: 0,
            results: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            stats: Vec::new(),
            errors: BTreeMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_error(&mut self, phase: ErrorPhase, job: JobKey, detail: impl Into<String>) {
        self.errors.entry(phase).or_default().push(PhaseError {
            job,
            detail: detail.into(),
        });
    }

    pub fn inserted_total(&self) -> u64 {
        self.stats.iter().map(|s| s.inserted_count).sum()
    }

    pub fn updated_total(&self) -> u64 {
        self.stats.iter().map(|s| s.updated_count).sum()
    }

    pub fn error_counts(&self) -> BTreeMap<ErrorPhase, usize> {
        self.errors.iter().map(|(p, e)| (*p, e.len())).collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn errors_for(&self, phase: ErrorPhase) -> &[PhaseError] {
        self.errors.get(&phase).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            run_id: self.run_id,
            formula_id: self.formula.formula_id.get(),
            new_jobs: self.new_jobs.len(),
            existing_jobs: self.existing_jobs.len(),
            jobs_run: self.jobs_to_run.len(),
            inserted: self.inserted_total(),
            updated: self.updated_total(),
            errors: self.error_counts(),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// Serializable totals of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub run_id: RunId,
    pub formula_id: u64,
    pub new_jobs: usize,
    pub existing_jobs: usize,
    pub jobs_run: usize,
    pub inserted: u64,
    pub updated: u64,
    pub errors: BTreeMap<ErrorPhase, usize>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rssformula_core::{FilingId, FormulaId};
    use std::path::PathBuf;

    fn report() -> BatchReport {
        BatchReport::new(
            RunId::new(),
            FormulaPackage {
                formula_id: FormulaId::new(7),
                artifact_path: PathBuf::from("f.xml"),
                raw_content: None,
                provenance: None,
                is_temporary: false,
            },
        )
    }

    #[test]
    fn totals_and_error_counts() {
        let mut r = report();
        let key = JobKey::new(FilingId::from(1), FormulaId::new(7));
        r.stats.push(UpsertStat::inserted("formulaeResults", 2));
        r.stats.push(UpsertStat::updated("formulaeResults", 1));
        r.record_error(ErrorPhase::DbInsert, key.clone(), "dup");
        r.record_error(ErrorPhase::DbInsert, key.clone(), "dup again");
        r.record_error(ErrorPhase::SaveFiles, key, "disk full");

        assert_eq!(r.inserted_total(), 2);
        assert_eq!(r.updated_total(), 1);
        assert_eq!(r.error_count(), 3);
        assert_eq!(r.errors_for(ErrorPhase::DbInsert).len(), 2);
        assert!(r.errors_for(ErrorPhase::FormulaProcessing).is_empty());

        let json = serde_json::to_value(r.summary()).unwrap();
        assert_eq!(json["errors"]["dbInsert"], 2);
        assert_eq!(json["errors"]["saveFiles"], 1);
        assert_eq!(json["inserted"], 2);
    }
}
