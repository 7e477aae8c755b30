//! `rssformula-engine`
//!
//! **Responsibility:** boundary to the external validation engine.
//!
//! The engine itself (document loading, DTS discovery, formula evaluation) is
//! opaque. This crate only defines:
//! - the contract a concrete engine must satisfy (`ValidationEngine`,
//!   `EngineFactory`, `DocumentModel`)
//! - how a loaded document becomes a `JobResult` (`ResultExtractor`)
//! - a scripted in-memory engine for tests/dev

pub mod contract;
pub mod error;
pub mod extract;
pub mod scripted;

pub use contract::{
    DocumentModel, EngineFactory, EngineRequest, NOT_LOADABLE_CODE, OutputDocument,
    ValidationEngine, ValueAssertion,
};
pub use error::EngineError;
pub use extract::ResultExtractor;
pub use scripted::{ScriptedDocument, ScriptedEngineFactory, ScriptedOutcome};
