//! `rssformula-core` — shared domain types of the formula batch pipeline.
//!
//! This crate contains **pure domain** values (no I/O beyond formula artifact
//! cleanup, no engine or storage concerns).

pub mod error;
pub mod filing;
pub mod id;
pub mod job;
pub mod package;
pub mod result;

pub use error::{BatchError, DomainError, DomainResult, ErrorPhase};
pub use filing::{Filing, JobCandidate, SourceRef};
pub use id::{FilingId, FormulaId, RunId};
pub use job::{JobKey, JobState, PersistOutcome};
pub use package::FormulaPackage;
pub use result::{AssertionCounts, JobResult, now_seconds};
