//! Postgres-backed result store and formula catalog.
//!
//! Results live in `"formulaeResults"`, one row per `{filingId, formulaId}`
//! (unique). Registered formulas live in `"formulae"`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | ResultStoreError |
//! |------------|----------------------|------------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (insert) / `Storage` |
//! | Database (check constraint violation) | `23514` | `InvalidRecord` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed, Other | N/A | `Storage` |

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Span, field, instrument};

use rssformula_core::{FilingId, FormulaId, JobKey, JobResult};

use super::query::{DEFAULT_CHUNK, KeyFilter};
use super::r#trait::{
    FormulaCatalog, FormulaRecord, MatchField, ResultStore, ResultStoreError, UpsertStat,
};

pub const RESULTS_TABLE: &str = "formulaeResults";
pub const FORMULAE_TABLE: &str = "formulae";

/// Schema the store expects. Applied by [`PostgresResultStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "formulae" (
    "formulaId" BIGINT PRIMARY KEY,
    "fileName" TEXT,
    "formulaLinkbase" TEXT,
    "description" TEXT
);

CREATE TABLE IF NOT EXISTS "formulaeResults" (
    "filingId" TEXT NOT NULL,
    "formulaId" BIGINT NOT NULL,
    "inlineXBRL" BOOLEAN NOT NULL DEFAULT FALSE,
    "formulaOutput" TEXT,
    "assertionsResults" JSONB,
    "processingLog" TEXT,
    "dateTimeProcessed" TIMESTAMPTZ NOT NULL,
    "errors" TEXT,
    UNIQUE ("filingId", "formulaId")
);
"#;

/// Postgres-backed result store.
///
/// The [`ResultStore`] trait is synchronous; the trait impls drive the async
/// methods on the ambient tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: Arc<PgPool>,
    chunk_size: usize,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            chunk_size: DEFAULT_CHUNK,
        }
    }

    /// Keys per existence query.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Create the results and formulae tables if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), ResultStoreError> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(
        skip(self, candidates),
        fields(candidate_count = candidates.len(), existing_count = field::Empty),
        err
    )]
    pub async fn existing_keys(
        &self,
        candidates: &[JobKey],
    ) -> Result<BTreeSet<JobKey>, ResultStoreError> {
        let filter = KeyFilter::new(candidates);
        let mut existing = BTreeSet::new();

        for chunk in filter.chunks(self.chunk_size) {
            let sql = format!(
                r#"SELECT "filingId", "formulaId" FROM "{RESULTS_TABLE}" WHERE {}"#,
                chunk.to_sql_where(1)
            );
            let mut query = sqlx::query(&sql);
            for key in chunk.keys() {
                query = query
                    .bind(key.filing_id.as_str())
                    .bind(formula_id_to_db(key.formula_id)?);
            }

            let rows = query
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("existing_keys", e))?;

            for row in rows {
                let key = key_from_row(&row)?;
                // Only report keys that were asked for.
                if chunk.matches(&key) {
                    existing.insert(key);
                }
            }
        }

        Span::current().record("existing_count", existing.len());
        Ok(existing)
    }

    #[instrument(skip(self, records), fields(record_count = records.len()), err)]
    pub async fn insert_results(
        &self,
        records: &[JobResult],
    ) -> Result<UpsertStat, ResultStoreError> {
        if records.is_empty() {
            return Ok(UpsertStat::inserted(RESULTS_TABLE, 0));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for r in records {
            let row = ResultRow::from_result(r)?;
            sqlx::query(
                r#"
                INSERT INTO "formulaeResults" (
                    "filingId",
                    "formulaId",
                    "inlineXBRL",
                    "formulaOutput",
                    "assertionsResults",
                    "processingLog",
                    "dateTimeProcessed",
                    "errors"
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(row.filing_id)
            .bind(row.formula_id)
            .bind(row.inline_xbrl)
            .bind(row.formula_output)
            .bind(row.assertions_results)
            .bind(row.processing_log)
            .bind(row.date_time_processed)
            .bind(row.errors)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ResultStoreError::AlreadyExists(r.key())
                } else {
                    map_sqlx_error("insert_result", e)
                }
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(UpsertStat::inserted(RESULTS_TABLE, records.len() as u64))
    }

    #[instrument(
        skip(self, records, match_fields),
        fields(record_count = records.len(), match_fields = ?match_fields),
        err
    )]
    pub async fn update_results(
        &self,
        records: &[JobResult],
        match_fields: &[MatchField],
    ) -> Result<UpsertStat, ResultStoreError> {
        if match_fields.is_empty() {
            return Err(ResultStoreError::UnsupportedMatch(
                "at least one match field is required".to_string(),
            ));
        }

        let sql = update_sql(match_fields);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut updated = 0u64;
        for r in records {
            let row = ResultRow::from_result(r)?;
            let mut query = sqlx::query(&sql)
                .bind(row.inline_xbrl)
                .bind(row.formula_output)
                .bind(row.assertions_results)
                .bind(row.processing_log)
                .bind(row.date_time_processed)
                .bind(row.errors);
            for field in match_fields {
                query = match field {
                    MatchField::FilingId => query.bind(row.filing_id.clone()),
                    MatchField::FormulaId => query.bind(row.formula_id),
                };
            }

            let done = query
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_result", e))?;
            updated += done.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(UpsertStat::updated(RESULTS_TABLE, updated))
    }

    #[instrument(skip(self), err)]
    pub async fn load_formula(
        &self,
        formula_id: FormulaId,
    ) -> Result<Option<FormulaRecord>, ResultStoreError> {
        let row = sqlx::query(
            r#"
            SELECT "formulaId", "fileName", "formulaLinkbase", "description"
            FROM "formulae"
            WHERE "formulaId" = $1
            "#,
        )
        .bind(formula_id_to_db(formula_id)?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_formula", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(FormulaRecord {
            formula_id,
            file_name: row.try_get("fileName").map_err(invalid_row)?,
            formula_linkbase: row.try_get("formulaLinkbase").map_err(invalid_row)?,
            description: row.try_get("description").map_err(invalid_row)?,
        }))
    }

    fn runtime(&self) -> Result<tokio::runtime::Handle, ResultStoreError> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            ResultStoreError::Storage(
                "PostgresResultStore requires a tokio runtime context".to_string(),
            )
        })
    }
}

impl ResultStore for PostgresResultStore {
    fn list_existing_keys(
        &self,
        candidates: &[JobKey],
    ) -> Result<BTreeSet<JobKey>, ResultStoreError> {
        if candidates.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.runtime()?.block_on(self.existing_keys(candidates))
    }

    fn insert(&self, records: &[JobResult]) -> Result<UpsertStat, ResultStoreError> {
        self.runtime()?.block_on(self.insert_results(records))
    }

    fn update(
        &self,
        records: &[JobResult],
        match_fields: &[MatchField],
    ) -> Result<UpsertStat, ResultStoreError> {
        self.runtime()?.block_on(self.update_results(records, match_fields))
    }
}

impl FormulaCatalog for PostgresResultStore {
    fn get_formula(
        &self,
        formula_id: FormulaId,
    ) -> Result<Option<FormulaRecord>, ResultStoreError> {
        self.runtime()?.block_on(self.load_formula(formula_id))
    }
}

/// `UPDATE` statement setting all non-identity columns, matched on `match_fields`.
fn update_sql(match_fields: &[MatchField]) -> String {
    let conditions = match_fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!(r#""{}" = ${}"#, f.column(), i + 7))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        r#"UPDATE "{RESULTS_TABLE}" SET
            "inlineXBRL" = $1, "formulaOutput" = $2, "assertionsResults" = $3,
            "processingLog" = $4, "dateTimeProcessed" = $5, "errors" = $6
        WHERE {conditions}"#
    )
}

struct ResultRow {
    filing_id: String,
    formula_id: i64,
    inline_xbrl: bool,
    formula_output: Option<String>,
    assertions_results: Option<serde_json::Value>,
    processing_log: String,
    date_time_processed: DateTime<Utc>,
    errors: Option<String>,
}

impl ResultRow {
    fn from_result(r: &JobResult) -> Result<Self, ResultStoreError> {
        Ok(Self {
            filing_id: r.filing_id.as_str().to_string(),
            formula_id: formula_id_to_db(r.formula_id)?,
            inline_xbrl: r.is_inline_document,
            formula_output: r.output_document.clone(),
            assertions_results: r.assertion_results_json(),
            processing_log: r.processing_log.clone(),
            date_time_processed: r.processed_at,
            errors: r.errors.clone(),
        })
    }
}

fn formula_id_to_db(id: FormulaId) -> Result<i64, ResultStoreError> {
    i64::try_from(id.get())
        .map_err(|_| ResultStoreError::InvalidRecord(format!("formula id {id} out of range")))
}

fn key_from_row(row: &sqlx::postgres::PgRow) -> Result<JobKey, ResultStoreError> {
    let filing: String = row.try_get("filingId").map_err(invalid_row)?;
    let formula: i64 = row.try_get("formulaId").map_err(invalid_row)?;
    let filing_id = FilingId::new(filing)
        .map_err(|e| ResultStoreError::InvalidRecord(e.to_string()))?;
    let formula_id = u64::try_from(formula)
        .map(FormulaId::new)
        .map_err(|_| ResultStoreError::InvalidRecord(format!("negative formula id {formula}")))?;
    Ok(JobKey::new(filing_id, formula_id))
}

fn invalid_row(err: sqlx::Error) -> ResultStoreError {
    ResultStoreError::InvalidRecord(format!("failed to read row: {err}"))
}

/// Map SQLx errors to result store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ResultStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => ResultStoreError::InvalidRecord(msg),
                _ => ResultStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            ResultStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => ResultStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sql_matches_on_requested_columns() {
        let sql = update_sql(&MatchField::JOB_KEY);
        assert!(sql.ends_with(r#"WHERE "filingId" = $7 AND "formulaId" = $8"#));
        assert!(sql.starts_with(r#"UPDATE "formulaeResults" SET"#));

        let sql = update_sql(&[MatchField::FormulaId]);
        assert!(sql.ends_with(r#"WHERE "formulaId" = $7"#));
    }

    #[test]
    fn schema_declares_job_key_unique() {
        assert!(SCHEMA.contains(r#"UNIQUE ("filingId", "formulaId")"#));
        assert_eq!(SCHEMA.split(';').filter(|s| !s.trim().is_empty()).count(), 2);
    }

    #[derive(Clone, Default)]
    struct RecordedFields(Arc<std::sync::Mutex<Vec<String>>>);

    impl tracing::field::Visit for RecordedFields {
        fn record_debug(&mut self, field: &tracing::field::Field, _: &dyn std::fmt::Debug) {
            if let Ok(mut names) = self.0.lock() {
                names.push(field.name().to_string());
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RecordedFields {
        fn on_record(
            &self,
            _: &tracing::span::Id,
            values: &tracing::span::Record<'_>,
            _: tracing_subscriber::layer::Context<'_, S>,
        ) {
            values.record(&mut self.clone());
        }
    }

    #[test]
    fn existing_count_is_recorded_on_the_query_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let recorded = RecordedFields::default();
        let subscriber = tracing_subscriber::registry().with(recorded.clone());
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let existing = tracing::subscriber::with_default(subscriber, || {
            rt.block_on(async {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_lazy("postgres://localhost/unused")
                    .unwrap();
                // No candidates means no query, so no server is needed.
                PostgresResultStore::new(pool).existing_keys(&[]).await
            })
        })
        .unwrap();

        assert!(existing.is_empty());
        assert!(recorded.0.lock().unwrap().iter().any(|f| f == "existing_count"));
    }

    #[test]
    fn formula_ids_beyond_bigint_are_rejected() {
        assert!(formula_id_to_db(FormulaId::new(u64::MAX)).is_err());
        assert_eq!(formula_id_to_db(FormulaId::new(7)).unwrap(), 7);
    }
}
