//! Batch orchestration: resolve, plan, run, persist, report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Span, debug, error, field, info, instrument, warn};

use rssformula_core::{BatchError, ErrorPhase, FormulaPackage, JobCandidate, JobResult, JobState};
use rssformula_infra::{
    FormulaCatalog, ResultExporter, ResultStore, ResultStoreSync, WorkRequest, Worker,
};

use crate::config::BatchConfig;
use crate::context::RunContext;
use crate::planner::{JobPlanner, Plan};
use crate::report::BatchReport;
use crate::resolver::{FormulaPackageResolver, FormulaSource};
use crate::source::CandidateSource;

/// How the batch's formula is supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaInput {
    Source(FormulaSource),
    /// Look the configured formula id up in the formula catalog.
    Catalog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub formula: FormulaInput,
    pub candidates: CandidateSource,
}

impl BatchRequest {
    pub fn new(formula: FormulaInput, candidates: impl Into<CandidateSource>) -> Self {
        Self {
            formula,
            candidates: candidates.into(),
        }
    }
}

/// Runs batches of one formula over many filings, one job at a time.
pub struct BatchController<S, W> {
    config: BatchConfig,
    sync: ResultStoreSync<S>,
    worker: W,
    catalog: Option<Arc<dyn FormulaCatalog>>,
}

impl<S: ResultStore, W: Worker> BatchController<S, W> {
    pub fn new(store: S, worker: W, config: BatchConfig) -> Self {
        let mut sync = ResultStoreSync::new(store, config.sync_flags());
        if let Some(folder) = config.export_folder() {
            sync = sync.with_exporter(ResultExporter::new(folder));
        }
        Self {
            config,
            sync,
            worker,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn FormulaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.sync.store()
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// Run one batch.
    ///
    /// Fails only on input or precondition errors, before any job runs.
    /// Per-job failures are recorded in the report.
    #[instrument(
        skip_all,
        fields(
            run_id = field::Empty,
            formula_id = ?self.config.formula_id,
            worker = self.worker.name()
        ),
        err
    )]
    pub fn run(&self, request: BatchRequest) -> Result<BatchReport, BatchError> {
        let formula_id = self.config.validate()?;
        if request.candidates.is_empty() {
            return Err(BatchError::fatal("the candidate job set is empty"));
        }
        let candidates = request.candidates.into_candidates()?;

        let ctx = RunContext::start(self.config.temp_dir.as_deref());
        Span::current().record("run_id", field::display(ctx.run_id()));

        let resolver = FormulaPackageResolver::new(ctx.temp_dir())?;
        let package = match &request.formula {
            FormulaInput::Source(source) => resolver.resolve(formula_id, source)?,
            FormulaInput::Catalog => {
                let catalog = self.catalog.as_deref().ok_or_else(|| {
                    BatchError::fatal(
                        "formula lookup requested but no formula catalog is configured",
                    )
                })?;
                resolver.resolve_from_catalog(catalog, formula_id)?
            }
        };

        let planner = JobPlanner::new(formula_id);
        let keys = planner.candidate_keys(&candidates);
        let existing = match self.sync.store().list_existing_keys(&keys) {
            Ok(existing) => existing,
            Err(e) => {
                self.discard_artifact(&package);
                return Err(BatchError::fatal(format!(
                    "failed to query existing results: {e}"
                )));
            }
        };

        let plan = planner.plan(&candidates, &existing, self.config.update_existing_results);
        info!(
            run_id = %ctx.run_id(),
            candidates = candidates.len(),
            new_jobs = plan.new_jobs.len(),
            existing_jobs = plan.existing_jobs.len(),
            jobs_to_run = plan.jobs_to_run.len(),
            duplicates = plan.duplicates,
            "batch planned"
        );

        let mut report = BatchReport::new(ctx.run_id(), package);
        report.new_jobs = plan.new_jobs.clone();
        report.existing_jobs = plan.existing_jobs.clone();
        report.duplicates = plan.duplicates;

        for candidate in &plan.jobs_to_run {
            report
                .jobs_to_run
                .push(candidate.key(formula_id));
            self.run_job(&ctx, &plan, candidate, &mut report);
        }

        self.discard_artifact(&report.formula);
        report.elapsed = ctx.elapsed();

        info!(
            run_id = %ctx.run_id(),
            filings = report.jobs_to_run.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            errors = report.error_count(),
            inserted = report.inserted_total(),
            updated = report.updated_total(),
            "formula batch finished"
        );
        Ok(report)
    }

    fn run_job(
        &self,
        ctx: &RunContext,
        plan: &Plan,
        candidate: &JobCandidate,
        report: &mut BatchReport,
    ) {
        let key = candidate.key(report.formula.formula_id);
        let request = WorkRequest::new(
            key.clone(),
            candidate.instance_url(),
            report.formula.artifact_path.clone(),
        )
        .inline(candidate.is_inline_document)
        .with_extra_imports(self.config.extra_imports.clone())
        .with_additional_imports(self.config.additional_imports.clone())
        .with_retry(self.config.retry.clone());

        debug!(
            run_id = %ctx.run_id(),
            filing_id = %key.filing_id,
            formula_id = %key.formula_id,
            url = %request.url,
            "job dispatched"
        );

        let result = match self.worker.run(&request) {
            Ok(result) => result,
            Err(e) => {
                error!(
                    run_id = %ctx.run_id(),
                    filing_id = %key.filing_id,
                    formula_id = %key.formula_id,
                    error = %e,
                    "worker failed"
                );
                JobResult::failed(
                    &key,
                    candidate.is_inline_document,
                    format!("worker {} failed: {e}", self.worker.name()),
                    0,
                )
            }
        };

        if let Some(detail) = result.errors.as_deref().filter(|e| !e.is_empty()) {
            warn!(
                run_id = %ctx.run_id(),
                filing_id = %key.filing_id,
                formula_id = %key.formula_id,
                phase = %ErrorPhase::FormulaProcessing,
                attempts = result.attempts,
                "job failed"
            );
            report.record_error(ErrorPhase::FormulaProcessing, key.clone(), detail);
        }

        let outcome = self.sync.sync(&result, plan.membership(&key));
        for (phase, detail) in outcome.errors {
            report.record_error(phase, key.clone(), detail);
        }
        report.stats.extend(outcome.stats);
        report.outcomes.insert(key.clone(), outcome.persist);

        let executed = match &result.errors {
            Some(error) if !error.is_empty() => JobState::FailedPermanently {
                error: error.clone(),
            },
            _ => JobState::Succeeded,
        };
        match executed.persist(outcome.persist) {
            Ok(state) => debug!(
                run_id = %ctx.run_id(),
                filing_id = %key.filing_id,
                state = ?state,
                "job finished"
            ),
            Err(e) => warn!(filing_id = %key.filing_id, error = %e, "illegal job transition"),
        }

        if self.config.return_results {
            report.results.insert(key, result);
        }
    }

    fn discard_artifact(&self, package: &FormulaPackage) {
        if self.config.keep_formula_artifact {
            return;
        }
        match package.cleanup() {
            Ok(true) => debug!(path = %package.artifact_path.display(), "formula artifact removed"),
            Ok(false) => {}
            Err(e) => warn!(
                path = %package.artifact_path.display(),
                error = %e,
                "failed to remove formula artifact"
            ),
        }
    }
}
