//! Result store boundary.
//!
//! Persists job results keyed by `{filingId, formulaId}` and exposes the
//! formula catalog the resolver looks formulas up in.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryResultStore;
pub use postgres::PostgresResultStore;
pub use query::{DEFAULT_CHUNK, KeyFilter};
pub use r#trait::{
    FormulaCatalog, FormulaRecord, MatchField, ResultStore, ResultStoreError, UpsertStat,
};
