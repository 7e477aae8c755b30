//! Job workers.
//!
//! A [`Worker`] takes one [`WorkRequest`] to a [`JobResult`]. The in-process
//! worker runs the engine on the calling thread; the process worker isolates
//! each job in a child process speaking the JSON wire protocol.

pub mod executor;
pub mod in_process;
pub mod process;
pub mod protocol;
pub mod types;

use std::sync::Arc;

use thiserror::Error;

use rssformula_core::JobResult;

pub use executor::WorkerExecutor;
pub use in_process::InProcessWorker;
pub use process::ProcessWorker;
pub use protocol::{WorkRequest, WorkResponse, serve, serve_stdio};
pub use types::RetryPolicy;

/// Worker-level failure: the job never produced a result of its own.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker exited with {}: {stderr}", exit_status(*code))]
    Exited { code: Option<i32>, stderr: String },

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("worker reported an error: {0}")]
    Remote(String),
}

fn exit_status(code: Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

/// Runs one job at a time.
pub trait Worker {
    fn name(&self) -> &str;

    fn run(&self, request: &WorkRequest) -> Result<JobResult, WorkerError>;
}

impl<W> Worker for Arc<W>
where
    W: Worker + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&self, request: &WorkRequest) -> Result<JobResult, WorkerError> {
        (**self).run(request)
    }
}

impl<W> Worker for &W
where
    W: Worker + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&self, request: &WorkRequest) -> Result<JobResult, WorkerError> {
        (**self).run(request)
    }
}
