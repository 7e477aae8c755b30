//! Infrastructure layer: result store, workers, file export, persistence sync.

pub mod export;
pub mod result_store;
pub mod sync;
pub mod worker;

pub use export::{ExportError, ResultExporter};
pub use result_store::{
    FormulaCatalog, FormulaRecord, InMemoryResultStore, KeyFilter, MatchField, PostgresResultStore,
    ResultStore, ResultStoreError, UpsertStat,
};
pub use sync::{Membership, ResultStoreSync, SyncFlags, SyncOutcome};
pub use worker::{
    InProcessWorker, ProcessWorker, RetryPolicy, WorkRequest, WorkResponse, Worker, WorkerError,
    WorkerExecutor, serve, serve_stdio,
};
