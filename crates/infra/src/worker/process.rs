use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use rssformula_core::JobResult;

use super::protocol::{WorkRequest, WorkResponse};
use super::{Worker, WorkerError};

/// Runs each job in its own child process.
///
/// The child gets the request on stdin and must answer with one
/// [`WorkResponse`] line on stdout (see [`super::serve`]). The call blocks
/// until the child exits.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    name: String,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = format!("process:{}", program.display());
        Self {
            program,
            args: Vec::new(),
            envs: Vec::new(),
            name,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, request: &WorkRequest) -> Result<JobResult, WorkerError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| WorkerError::Protocol(format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        debug!(
            worker = %self.name,
            pid = child.id(),
            filing_id = %request.job.filing_id,
            formula_id = %request.job.formula_id,
            "worker spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading is reported by its exit status.
            if let Err(e) = stdin.write_all(&payload) {
                warn!(worker = %self.name, error = %e, "failed to write work request");
            }
        }

        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(WorkerError::Exited {
                code: output.status.code(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| WorkerError::Protocol("worker wrote no response".to_string()))?;

        match serde_json::from_str::<WorkResponse>(line) {
            Ok(WorkResponse::Result(result)) if result.key() == request.job => Ok(result),
            Ok(WorkResponse::Result(result)) => Err(WorkerError::Protocol(format!(
                "worker answered for {} instead of {}",
                result.key(),
                request.job
            ))),
            Ok(WorkResponse::Error(msg)) => Err(WorkerError::Remote(msg)),
            Err(e) => Err(WorkerError::Protocol(format!("malformed response: {e}"))),
        }
    }
}
