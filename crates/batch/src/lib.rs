//! `rssformula-batch` — runs one formula over a batch of filings.
//!
//! The [`BatchController`] resolves the formula once, plans which jobs need to
//! run against the result store, drives a [`rssformula_infra::Worker`] per
//! job, persists each result, and returns a [`BatchReport`].

pub mod config;
pub mod context;
pub mod controller;
pub mod planner;
pub mod report;
pub mod resolver;
pub mod source;

pub use config::{BatchConfig, ConfigError};
pub use context::RunContext;
pub use controller::{BatchController, BatchRequest, FormulaInput};
pub use planner::{JobPlanner, Plan};
pub use report::{BatchReport, BatchSummary, PhaseError};
pub use resolver::{FormulaPackageResolver, FormulaSource, canonicalize};
pub use source::CandidateSource;

/// Initialize logging for a batch host process.
pub fn init_logging() {
    rssformula_observability::init();
}
