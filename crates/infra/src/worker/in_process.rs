use rssformula_core::JobResult;
use rssformula_engine::EngineFactory;

use super::executor::WorkerExecutor;
use super::protocol::WorkRequest;
use super::{Worker, WorkerError};

/// Runs jobs on the calling thread, one fresh engine per attempt.
///
/// Used where process isolation is unavailable, and in tests.
#[derive(Debug, Clone)]
pub struct InProcessWorker<F> {
    executor: WorkerExecutor<F>,
}

impl<F: EngineFactory> InProcessWorker<F> {
    pub fn new(factory: F) -> Self {
        Self {
            executor: WorkerExecutor::new(factory),
        }
    }

    pub fn factory(&self) -> &F {
        self.executor.factory()
    }
}

impl<F: EngineFactory> Worker for InProcessWorker<F> {
    fn name(&self) -> &str {
        "in-process"
    }

    fn run(&self, request: &WorkRequest) -> Result<JobResult, WorkerError> {
        Ok(self.executor.execute(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::RetryPolicy;
    use rssformula_core::{FilingId, FormulaId, JobKey};
    use rssformula_engine::{ScriptedEngineFactory, ScriptedOutcome};

    #[test]
    fn never_fails_at_worker_level() {
        let factory = ScriptedEngineFactory::new()
            .script("u", vec![ScriptedOutcome::Fail("boom".into())]);
        let worker = InProcessWorker::new(factory);
        let key = JobKey::new(FilingId::from(1), FormulaId::new(2));
        let request = WorkRequest::new(key, "u", "f.xml").with_retry(RetryPolicy::immediate(3));

        let result = worker.run(&request).unwrap();

        assert!(result.is_failed());
        assert_eq!(worker.factory().created(), 1);
        assert_eq!(worker.name(), "in-process");
    }
}
