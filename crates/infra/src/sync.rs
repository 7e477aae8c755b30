//! Routing of finished job results into the result store and export folder.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rssformula_core::{ErrorPhase, JobResult, PersistOutcome};

use crate::export::ResultExporter;
use crate::result_store::{MatchField, ResultStore, UpsertStat};

/// Whether a job's key was already stored when the batch was planned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    New,
    Existing,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFlags {
    pub insert_result_into_db: bool,
    pub update_existing_results: bool,
    /// Store results whose job failed (no output, non-empty errors).
    pub persist_failed_results: bool,
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self {
            insert_result_into_db: false,
            update_existing_results: false,
            persist_failed_results: true,
        }
    }
}

/// What happened to one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub persist: PersistOutcome,
    pub stats: Vec<UpsertStat>,
    /// Persistence failures of this job, by phase.
    pub errors: Vec<(ErrorPhase, String)>,
    pub exported_to: Option<PathBuf>,
}

impl SyncOutcome {
    fn skipped() -> Self {
        Self {
            persist: PersistOutcome::Skipped,
            stats: Vec::new(),
            errors: Vec::new(),
            exported_to: None,
        }
    }
}

/// Persists each job result according to its membership and the batch flags.
///
/// Failures are isolated to the job and phase; nothing here aborts a batch.
#[derive(Debug, Clone)]
pub struct ResultStoreSync<S> {
    store: S,
    flags: SyncFlags,
    exporter: Option<ResultExporter>,
}

impl<S: ResultStore> ResultStoreSync<S> {
    pub fn new(store: S, flags: SyncFlags) -> Self {
        Self {
            store,
            flags,
            exporter: None,
        }
    }

    pub fn with_exporter(mut self, exporter: ResultExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn flags(&self) -> SyncFlags {
        self.flags
    }

    pub fn sync(&self, result: &JobResult, membership: Membership) -> SyncOutcome {
        let mut outcome = SyncOutcome::skipped();

        let persistable = !result.is_failed() || self.flags.persist_failed_results;
        if persistable && self.flags.insert_result_into_db {
            match membership {
                Membership::New => self.insert(result, &mut outcome),
                Membership::Existing if self.flags.update_existing_results => {
                    self.update(result, &mut outcome)
                }
                Membership::Existing => {}
            }
        }

        if let Some(exporter) = &self.exporter {
            // A failed job has nothing to export; its failure is already recorded.
            if !result.is_failed() {
                match exporter.export(result) {
                    Ok(path) => outcome.exported_to = Some(path),
                    Err(e) => {
                        warn!(
                            filing_id = %result.filing_id,
                            formula_id = %result.formula_id,
                            phase = %ErrorPhase::SaveFiles,
                            error = %e,
                            "export failed"
                        );
                        outcome.errors.push((ErrorPhase::SaveFiles, e.to_string()));
                    }
                }
            }
        }

        debug!(
            filing_id = %result.filing_id,
            formula_id = %result.formula_id,
            persist = ?outcome.persist,
            "result synced"
        );
        outcome
    }

    fn insert(&self, result: &JobResult, outcome: &mut SyncOutcome) {
        match self.store.insert(std::slice::from_ref(result)) {
            Ok(stat) => {
                outcome.persist = PersistOutcome::Inserted;
                outcome.stats.push(stat);
            }
            Err(e) => {
                warn!(
                    filing_id = %result.filing_id,
                    formula_id = %result.formula_id,
                    phase = %ErrorPhase::DbInsert,
                    error = %e,
                    "insert failed"
                );
                outcome.errors.push((ErrorPhase::DbInsert, e.to_string()));
            }
        }
    }

    fn update(&self, result: &JobResult, outcome: &mut SyncOutcome) {
        match self
            .store
            .update(std::slice::from_ref(result), &MatchField::JOB_KEY)
        {
            Ok(stat) if stat.updated_count == 0 => {
                let detail = format!("no stored result matched {}", result.key());
                warn!(
                    filing_id = %result.filing_id,
                    formula_id = %result.formula_id,
                    phase = %ErrorPhase::DbUpdate,
                    "update matched nothing"
                );
                outcome.stats.push(stat);
                outcome.errors.push((ErrorPhase::DbUpdate, detail));
            }
            Ok(stat) => {
                outcome.persist = PersistOutcome::Updated;
                outcome.stats.push(stat);
            }
            Err(e) => {
                warn!(
                    filing_id = %result.filing_id,
                    formula_id = %result.formula_id,
                    phase = %ErrorPhase::DbUpdate,
                    error = %e,
                    "update failed"
                );
                outcome.errors.push((ErrorPhase::DbUpdate, e.to_string()));
            }
        }
    }
}
