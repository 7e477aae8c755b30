use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rssformula_core::RunId;

/// Per-run state threaded through one batch.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: RunId,
    started: Instant,
    temp_dir: PathBuf,
}

impl RunContext {
    /// Start a run. Generated artifacts go to `temp_dir`, or the system temp
    /// directory when none is given.
    pub fn start(temp_dir: Option<&Path>) -> Self {
        Self {
            run_id: RunId::new(),
            started: Instant::now(),
            temp_dir: temp_dir.map_or_else(std::env::temp_dir, Path::to_path_buf),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_system_temp_dir() {
        let ctx = RunContext::start(None);
        assert_eq!(ctx.temp_dir(), std::env::temp_dir());
        assert_ne!(ctx.run_id(), RunContext::start(None).run_id());
    }
}
