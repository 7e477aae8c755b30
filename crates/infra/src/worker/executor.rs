//! Runs one job against the validation engine with bounded retry.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tracing::{debug, error, info, warn};

use rssformula_core::{DomainError, JobKey, JobResult, JobState};
use rssformula_engine::{
    DocumentModel, EngineError, EngineFactory, EngineRequest, NOT_LOADABLE_CODE, ResultExtractor,
    ValidationEngine,
};

use super::protocol::WorkRequest;

/// Outcome of a single engine attempt.
#[derive(Debug)]
enum Attempt {
    Done(JobResult),
    NotLoadable(Vec<String>),
    Failed(String),
}

/// Executes jobs with a fresh engine instance per attempt.
///
/// A document that is not loadable is retried up to the request's retry
/// count, never more than [`crate::RetryPolicy::MAX_RETRIES`] times. Every other
/// failure, panics included, ends the job with a failed result instead of
/// propagating.
#[derive(Debug, Clone)]
pub struct WorkerExecutor<F> {
    factory: F,
    extractor: ResultExtractor,
}

impl<F: EngineFactory> WorkerExecutor<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            extractor: ResultExtractor::new(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Run `request` to a terminal result.
    pub fn execute(&self, request: &WorkRequest) -> JobResult {
        let key = &request.job;
        let input = request.input_file();
        let engine_request =
            EngineRequest::new(&input, &request.artifact_path, &request.extra_imports);
        let policy = &request.retry;
        let max_retries = policy.effective_retries();
        if !policy.is_within_bound() {
            warn!(
                filing_id = %key.filing_id,
                configured = policy.max_retries,
                max_retries,
                "retry count above the bound; capping"
            );
        }

        let mut state = JobState::New;
        advance(&mut state, key, JobState::dispatch);

        let mut reasons: BTreeSet<String> = BTreeSet::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(
                filing_id = %key.filing_id,
                formula_id = %key.formula_id,
                attempt,
                input = %input,
                "engine attempt"
            );

            match self.run_attempt(&engine_request, key, request.is_inline_document, attempt) {
                Attempt::Done(result) => {
                    advance(&mut state, key, JobState::succeed);
                    info!(
                        filing_id = %key.filing_id,
                        formula_id = %key.formula_id,
                        attempt,
                        assertions = result.assertion_results.len(),
                        "job succeeded"
                    );
                    return result;
                }
                Attempt::NotLoadable(new_reasons) => {
                    reasons.extend(new_reasons);
                    let retries_done = attempt - 1;
                    if policy.should_retry(retries_done) {
                        advance(&mut state, key, |s| s.retry(max_retries));
                        warn!(
                            filing_id = %key.filing_id,
                            formula_id = %key.formula_id,
                            attempt,
                            pause_ms = policy.pause_ms,
                            "document not loadable; retrying with a fresh engine"
                        );
                        if policy.pause_ms > 0 {
                            thread::sleep(policy.pause());
                        }
                        continue;
                    }

                    let detail = format!(
                        "{NOT_LOADABLE_CODE}: {}",
                        reasons.iter().cloned().collect::<Vec<_>>().join("; ")
                    );
                    advance(&mut state, key, |s| s.fail(detail.clone()));
                    error!(
                        filing_id = %key.filing_id,
                        formula_id = %key.formula_id,
                        attempts = attempt,
                        error = %detail,
                        "document never loaded; giving up"
                    );
                    return JobResult::failed(key, request.is_inline_document, detail, attempt);
                }
                Attempt::Failed(detail) => {
                    advance(&mut state, key, |s| s.fail(detail.clone()));
                    error!(
                        filing_id = %key.filing_id,
                        formula_id = %key.formula_id,
                        attempt,
                        error = %detail,
                        "engine attempt failed"
                    );
                    return JobResult::failed(key, request.is_inline_document, detail, attempt);
                }
            }
        }
    }

    fn run_attempt(
        &self,
        request: &EngineRequest<'_>,
        key: &JobKey,
        is_inline_document: bool,
        attempt: u32,
    ) -> Attempt {
        let mut engine = match self.factory.create() {
            Ok(engine) => engine,
            Err(e) => return classify(e),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match engine.run(request) {
            Ok(mut document) => {
                let outcome = if document.is_not_loadable() {
                    Attempt::NotLoadable(document.errors().into_iter().collect())
                } else {
                    let result =
                        self.extractor.extract(&document, key, is_inline_document, attempt);
                    Attempt::Done(result)
                };
                document.close();
                outcome
            }
            Err(e) => classify(e),
        }));

        let closed = panic::catch_unwind(AssertUnwindSafe(|| engine.close()));
        if closed.is_err() {
            warn!(filing_id = %key.filing_id, attempt, "engine panicked while closing");
        }

        outcome.unwrap_or_else(|payload| Attempt::Failed(panic_message(payload.as_ref())))
    }
}

fn classify(err: EngineError) -> Attempt {
    match err {
        EngineError::DocumentNotLoadable { reasons, .. } => Attempt::NotLoadable(reasons),
        other => Attempt::Failed(other.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("engine panicked: {msg}")
}

fn advance(
    state: &mut JobState,
    key: &JobKey,
    transition: impl FnOnce(&JobState) -> Result<JobState, DomainError>,
) {
    match transition(state) {
        Ok(next) => *state = next,
        Err(e) => warn!(
            filing_id = %key.filing_id,
            from = ?state,
            error = %e,
            "illegal job transition"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::RetryPolicy;
    use rssformula_core::{FilingId, FormulaId};
    use rssformula_engine::{
        OutputDocument, ScriptedDocument, ScriptedEngineFactory, ScriptedOutcome, ValueAssertion,
    };

    const URL: &str = "https://example.test/filing.xml";

    fn request() -> WorkRequest {
        WorkRequest::new(
            JobKey::new(FilingId::from(10), FormulaId::new(7)),
            URL,
            "/tmp/formula.xml",
        )
        .with_retry(RetryPolicy::immediate(3))
    }

    #[test]
    fn success_extracts_result() {
        let doc = ScriptedDocument::default()
            .with_assertion(ValueAssertion::new("a1", 2, 1))
            .with_output(OutputDocument::utf8("<out/>"))
            .with_log("line1\nline2");
        let factory =
            ScriptedEngineFactory::new().script(URL, vec![ScriptedOutcome::Loaded(doc)]);
        let executor = WorkerExecutor::new(factory);

        let result = executor.execute(&request());

        assert_eq!(result.key(), request().job);
        assert!(result.errors.is_none());
        assert_eq!(result.output_document.as_deref(), Some("<out/>"));
        assert_eq!(result.assertion_results["a1"].not_satisfied_count, 1);
        assert_eq!(result.processing_log, "line1line2");
        assert_eq!(result.attempts, 1);
        assert_eq!(executor.factory().closed(), 1);
    }

    #[test]
    fn retries_not_loadable_then_succeeds() {
        let factory = ScriptedEngineFactory::new().script(
            URL,
            vec![
                ScriptedOutcome::NotLoadable("timeout".into()),
                ScriptedOutcome::Loaded(ScriptedDocument::not_loadable("404")),
                ScriptedOutcome::Loaded(ScriptedDocument::default().with_log("ok")),
            ],
        );
        let executor = WorkerExecutor::new(factory);

        let result = executor.execute(&request());

        assert!(!result.is_failed());
        assert_eq!(result.attempts, 3);
        assert_eq!(executor.factory().created(), 3);
        assert_eq!(executor.factory().closed(), 3);
    }

    #[test]
    fn gives_up_after_retry_bound() {
        let factory = ScriptedEngineFactory::new()
            .script(URL, vec![ScriptedOutcome::NotLoadable("unreachable".into())]);
        let executor = WorkerExecutor::new(factory);

        let result = executor.execute(&request());

        assert_eq!(executor.factory().attempts_for(URL), 4);
        assert_eq!(result.attempts, 4);
        assert!(result.is_failed());
        assert!(result.errors.as_deref().unwrap().contains("unreachable"));
        assert!(result.assertion_results.is_empty());
        assert!(result.output_document.is_none());
        assert_eq!(executor.factory().closed(), 4);
    }

    #[test]
    fn engine_loads_the_filing_with_its_additional_imports() {
        let executor = WorkerExecutor::new(ScriptedEngineFactory::new());

        let request =
            request().with_additional_imports(Some("https://example.test/extra.xsd".into()));
        let result = executor.execute(&request);

        assert!(!result.is_failed());
        assert_eq!(
            executor.factory().calls(),
            vec![format!("{URL}|https://example.test/extra.xsd")]
        );
    }

    #[test]
    fn retry_count_above_bound_is_capped() {
        let factory = ScriptedEngineFactory::new()
            .script(URL, vec![ScriptedOutcome::NotLoadable("unreachable".into())]);
        let executor = WorkerExecutor::new(factory);

        let result = executor.execute(&request().with_retry(RetryPolicy::immediate(10)));

        assert_eq!(executor.factory().attempts_for(URL), 4);
        assert_eq!(result.attempts, 4);
        assert!(result.is_failed());
    }

    #[test]
    fn no_retry_policy_makes_one_attempt() {
        let factory = ScriptedEngineFactory::new()
            .script(URL, vec![ScriptedOutcome::NotLoadable("unreachable".into())]);
        let executor = WorkerExecutor::new(factory);

        let result = executor.execute(&request().with_retry(RetryPolicy::no_retry()));

        assert_eq!(executor.factory().attempts_for(URL), 1);
        assert!(result.is_failed());
    }

    #[test]
    fn other_engine_errors_are_not_retried() {
        let factory = ScriptedEngineFactory::new()
            .script(URL, vec![ScriptedOutcome::Fail("bad formula".into())]);
        let executor = WorkerExecutor::new(factory);

        let result = executor.execute(&request());

        assert_eq!(result.attempts, 1);
        assert!(result.errors.as_deref().unwrap().contains("bad formula"));
    }

    #[test]
    fn engine_creation_failure_is_captured() {
        let executor = WorkerExecutor::new(ScriptedEngineFactory::new().failing_creation("no jvm"));
        let result = executor.execute(&request());
        assert!(result.errors.as_deref().unwrap().contains("no jvm"));
    }

    struct PanickingFactory;
    struct PanickingEngine;

    impl EngineFactory for PanickingFactory {
        type Engine = PanickingEngine;

        fn create(&self) -> Result<PanickingEngine, EngineError> {
            Ok(PanickingEngine)
        }
    }

    impl ValidationEngine for PanickingEngine {
        type Document = ScriptedDocument;

        fn run(&mut self, _request: &EngineRequest<'_>) -> Result<ScriptedDocument, EngineError> {
            panic!("engine exploded")
        }

        fn close(&mut self) {}
    }

    #[test]
    fn engine_panics_become_failed_results() {
        let result = WorkerExecutor::new(PanickingFactory).execute(&request());
        assert!(result.is_failed());
        assert!(result.errors.as_deref().unwrap().contains("engine exploded"));
    }
}
