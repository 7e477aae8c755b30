use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use rssformula_core::{FormulaId, JobKey, JobResult};

use super::r#trait::{
    FormulaCatalog, FormulaRecord, MatchField, ResultStore, ResultStoreError, UpsertStat,
};

const TABLE: &str = "formulaeResults";

/// In-memory result store and formula catalog.
///
/// Intended for tests/dev. Records are kept in write order per key.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<BTreeMap<JobKey, JobResult>>,
    formulae: RwLock<HashMap<FormulaId, FormulaRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a formula in the catalog (replacing any previous entry).
    pub fn add_formula(&self, record: FormulaRecord) -> Result<(), ResultStoreError> {
        let mut formulae = self
            .formulae
            .write()
            .map_err(|_| ResultStoreError::Storage("lock poisoned".to_string()))?;
        formulae.insert(record.formula_id, record);
        Ok(())
    }

    pub fn get(&self, key: &JobKey) -> Option<JobResult> {
        self.results.read().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.results.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<JobResult> {
        self.results
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn list_existing_keys(
        &self,
        candidates: &[JobKey],
    ) -> Result<BTreeSet<JobKey>, ResultStoreError> {
        let results = self
            .results
            .read()
            .map_err(|_| ResultStoreError::Storage("lock poisoned".to_string()))?;
        Ok(candidates
            .iter()
            .filter(|k| results.contains_key(*k))
            .cloned()
            .collect())
    }

    fn insert(&self, records: &[JobResult]) -> Result<UpsertStat, ResultStoreError> {
        let mut results = self
            .results
            .write()
            .map_err(|_| ResultStoreError::Storage("lock poisoned".to_string()))?;

        // Validate the whole batch before writing anything.
        let mut batch_keys = BTreeSet::new();
        for r in records {
            let key = r.key();
            if results.contains_key(&key) || !batch_keys.insert(key.clone()) {
                return Err(ResultStoreError::AlreadyExists(key));
            }
        }

        for r in records {
            results.insert(r.key(), r.clone());
        }
        Ok(UpsertStat::inserted(TABLE, records.len() as u64))
    }

    fn update(
        &self,
        records: &[JobResult],
        match_fields: &[MatchField],
    ) -> Result<UpsertStat, ResultStoreError> {
        if match_fields.is_empty() {
            return Err(ResultStoreError::UnsupportedMatch(
                "at least one match field is required".to_string(),
            ));
        }

        let mut results = self
            .results
            .write()
            .map_err(|_| ResultStoreError::Storage("lock poisoned".to_string()))?;

        let mut updated = 0u64;
        for incoming in records {
            let matched: Vec<JobKey> = results
                .iter()
                .filter(|(_, stored)| match_fields.iter().all(|f| f.matches(stored, incoming)))
                .map(|(k, _)| k.clone())
                .collect();

            for key in matched {
                // Identity columns not used for matching keep their stored value.
                let mut replacement = incoming.clone();
                replacement.filing_id = key.filing_id.clone();
                replacement.formula_id = key.formula_id;
                results.insert(key, replacement);
                updated += 1;
            }
        }
        Ok(UpsertStat::updated(TABLE, updated))
    }
}

impl FormulaCatalog for InMemoryResultStore {
    fn get_formula(
        &self,
        formula_id: FormulaId,
    ) -> Result<Option<FormulaRecord>, ResultStoreError> {
        let formulae = self
            .formulae
            .read()
            .map_err(|_| ResultStoreError::Storage("lock poisoned".to_string()))?;
        Ok(formulae.get(&formula_id).cloned())
    }
}
