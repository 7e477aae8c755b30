//! Key filters in the two query idioms backends use.
//!
//! Relational backends get `("filingId" = $1 AND "formulaId" = $2) OR ...`
//! with positional parameters; document stores get the `$or`/`$and` filter.

use std::collections::HashSet;

use serde_json::{Value as JsonValue, json};

use rssformula_core::JobKey;

/// Default number of keys per relational query (two bind parameters each).
pub const DEFAULT_CHUNK: usize = 1000;

/// Disjunction of `{filingId, formulaId}` equality filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    keys: Vec<JobKey>,
}

impl KeyFilter {
    /// Build a filter over `keys`; duplicates are dropped, order is kept.
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a JobKey>) -> Self {
        let mut seen = HashSet::new();
        let keys = keys
            .into_iter()
            .filter(|k| seen.insert(*k))
            .cloned()
            .collect();
        Self { keys }
    }

    pub fn keys(&self) -> &[JobKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn matches(&self, key: &JobKey) -> bool {
        self.keys.contains(key)
    }

    /// SQL `WHERE` body with positional parameters starting at `$first_param`.
    ///
    /// Parameters alternate filing id, formula id, in key order.
    pub fn to_sql_where(&self, first_param: usize) -> String {
        self.keys
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let p = first_param + i * 2;
                format!(r#"("filingId" = ${} AND "formulaId" = ${})"#, p, p + 1)
            })
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    /// Document-store filter: `{"$or": [{"$and": [{"filingId": ..}, {"formulaId": ..}]}, ..]}`.
    pub fn to_document_filter(&self) -> JsonValue {
        let clauses: Vec<JsonValue> = self
            .keys
            .iter()
            .map(|k| {
                json!({
                    "$and": [
                        { "filingId": k.filing_id.as_str() },
                        { "formulaId": k.formula_id.get() },
                    ]
                })
            })
            .collect();
        json!({ "$or": clauses })
    }

    /// Split into filters of at most `size` keys (bind-parameter limits).
    pub fn chunks(&self, size: usize) -> Vec<KeyFilter> {
        self.keys
            .chunks(size.max(1))
            .map(|c| KeyFilter { keys: c.to_vec() })
            .collect()
    }
}
