//! Batch configuration.
//!
//! Loaded from JSON, overridden from `RSSFORMULA_*` environment variables, and
//! validated once before a batch starts.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rssformula_core::{BatchError, FormulaId};
use rssformula_infra::{RetryPolicy, SyncFlags};

pub const ENV_PREFIX: &str = "RSSFORMULA_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub formula_id: Option<FormulaId>,
    pub insert_result_into_db: bool,
    /// Re-run jobs that already have a stored result and update them.
    pub update_existing_results: bool,
    pub save_results_to_folder: bool,
    pub folder_path: Option<PathBuf>,
    pub return_results: bool,
    /// Where generated formula artifacts go (system temp dir when unset).
    pub temp_dir: Option<PathBuf>,
    pub keep_formula_artifact: bool,
    /// Artifacts imported by the engine after the formula.
    pub extra_imports: Vec<PathBuf>,
    /// `|`-separated documents the engine loads together with each filing.
    pub additional_imports: Option<String>,
    /// At most [`RetryPolicy::MAX_RETRIES`] retries.
    pub retry: RetryPolicy,
    pub persist_failed_results: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            formula_id: None,
            insert_result_into_db: false,
            update_existing_results: false,
            save_results_to_folder: false,
            folder_path: None,
            return_results: true,
            temp_dir: None,
            keep_formula_artifact: false,
            extra_imports: Vec::new(),
            additional_imports: None,
            retry: RetryPolicy::default(),
            persist_failed_results: true,
        }
    }
}

impl BatchConfig {
    pub fn for_formula(formula_id: FormulaId) -> Self {
        Self {
            formula_id: Some(formula_id),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Override fields from `lookup` (called with full variable names).
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &str| {
            let var = format!("{ENV_PREFIX}{name}");
            lookup(&var).map(|value| (var, value))
        };

        if let Some((var, value)) = get("FORMULA_ID") {
            self.formula_id = Some(parse(&var, &value)?);
        }
        if let Some((var, value)) = get("INSERT_RESULT_INTO_DB") {
            self.insert_result_into_db = parse_bool(&var, &value)?;
        }
        if let Some((var, value)) = get("UPDATE_EXISTING_RESULTS") {
            self.update_existing_results = parse_bool(&var, &value)?;
        }
        if let Some((var, value)) = get("SAVE_RESULTS_TO_FOLDER") {
            self.save_results_to_folder = parse_bool(&var, &value)?;
        }
        if let Some((_, value)) = get("FOLDER_PATH") {
            self.folder_path = non_empty(value).map(PathBuf::from);
        }
        if let Some((var, value)) = get("RETURN_RESULTS") {
            self.return_results = parse_bool(&var, &value)?;
        }
        if let Some((_, value)) = get("TEMP_DIR") {
            self.temp_dir = non_empty(value).map(PathBuf::from);
        }
        if let Some((var, value)) = get("KEEP_FORMULA_ARTIFACT") {
            self.keep_formula_artifact = parse_bool(&var, &value)?;
        }
        if let Some((_, value)) = get("ADDITIONAL_IMPORTS") {
            self.additional_imports = non_empty(value);
        }
        if let Some((var, value)) = get("MAX_RETRIES") {
            self.retry.max_retries = parse(&var, &value)?;
        }
        if let Some((var, value)) = get("PERSIST_FAILED_RESULTS") {
            self.persist_failed_results = parse_bool(&var, &value)?;
        }
        Ok(())
    }

    /// Check the preconditions a batch needs before doing any work.
    pub fn validate(&self) -> Result<FormulaId, BatchError> {
        let formula_id = self
            .formula_id
            .ok_or_else(|| BatchError::fatal("a formula id must be supplied"))?;

        if self.save_results_to_folder && self.folder_path.is_none() {
            return Err(BatchError::fatal(
                "saving results to a folder requires a folder path",
            ));
        }

        if !self.retry.is_within_bound() {
            return Err(BatchError::input(format!(
                "max_retries is {}; at most {} retries are allowed",
                self.retry.max_retries,
                RetryPolicy::MAX_RETRIES
            )));
        }

        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(BatchError::input(format!(
                    "temp dir {} does not exist",
                    dir.display()
                )));
            }
        }

        Ok(formula_id)
    }

    pub fn sync_flags(&self) -> SyncFlags {
        SyncFlags {
            insert_result_into_db: self.insert_result_into_db,
            update_existing_results: self.update_existing_results,
            persist_failed_results: self.persist_failed_results,
        }
    }

    /// Folder results are exported to, when export is on.
    pub fn export_folder(&self) -> Option<&Path> {
        if self.save_results_to_folder {
            self.folder_path.as_deref()
        } else {
            None
        }
    }
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_batch_surface() {
        let c = BatchConfig::default();
        assert!(!c.insert_result_into_db);
        assert!(!c.update_existing_results);
        assert!(!c.save_results_to_folder);
        assert!(c.return_results);
        assert!(c.persist_failed_results);
        assert_eq!(c.retry.max_retries, 3);
    }

    #[test]
    fn env_overrides_fields() {
        let mut c = BatchConfig::default();
        c.apply_env_from(env(&[
            ("RSSFORMULA_FORMULA_ID", "7"),
            ("RSSFORMULA_INSERT_RESULT_INTO_DB", "true"),
            ("RSSFORMULA_FOLDER_PATH", "/tmp/out"),
            ("RSSFORMULA_MAX_RETRIES", "1"),
        ]))
        .unwrap();

        assert_eq!(c.formula_id, Some(FormulaId::new(7)));
        assert!(c.insert_result_into_db);
        assert_eq!(c.folder_path.as_deref(), Some(Path::new("/tmp/out")));
        assert_eq!(c.retry.max_retries, 1);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut c = BatchConfig::default();
        let err = c
            .apply_env_from(env(&[("RSSFORMULA_RETURN_RESULTS", "maybe")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { var, .. } if var == "RSSFORMULA_RETURN_RESULTS"
        ));
    }

    #[test]
    fn validate_requires_formula_and_export_folder() {
        assert!(BatchConfig::default().validate().is_err());

        let mut c = BatchConfig::for_formula(FormulaId::new(7));
        assert_eq!(c.validate().unwrap(), FormulaId::new(7));

        c.save_results_to_folder = true;
        assert!(matches!(c.validate(), Err(BatchError::Fatal(_))));

        c.folder_path = Some(PathBuf::from("out"));
        assert!(c.validate().is_ok());
        assert_eq!(c.export_folder(), Some(Path::new("out")));
    }

    #[test]
    fn validate_rejects_missing_temp_dir() {
        let mut c = BatchConfig::for_formula(FormulaId::new(7));
        c.temp_dir = Some(PathBuf::from("/definitely/not/here"));
        assert!(matches!(c.validate(), Err(BatchError::Input(_))));
    }

    #[test]
    fn validate_rejects_retries_above_the_bound() {
        let mut c = BatchConfig::for_formula(FormulaId::new(7));
        c.apply_env_from(env(&[("RSSFORMULA_MAX_RETRIES", "10")]))
            .unwrap();
        assert_eq!(c.retry.max_retries, 10);
        assert!(c.validate().unwrap_err().is_input());

        c.retry = RetryPolicy::immediate(RetryPolicy::MAX_RETRIES);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn additional_imports_come_from_env() {
        let mut c = BatchConfig::default();
        c.apply_env_from(env(&[("RSSFORMULA_ADDITIONAL_IMPORTS", " a.xsd|b.xml ")]))
            .unwrap();
        assert_eq!(c.additional_imports.as_deref(), Some("a.xsd|b.xml"));

        c.apply_env_from(env(&[("RSSFORMULA_ADDITIONAL_IMPORTS", "")]))
            .unwrap();
        assert!(c.additional_imports.is_none());
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"{"formula_id": 9, "insert_result_into_db": true, "retry": {"max_retries": 2}}"#,
        )
        .unwrap();

        let c = BatchConfig::from_json_file(&path).unwrap();
        assert_eq!(c.formula_id, Some(FormulaId::new(9)));
        assert!(c.insert_result_into_db);
        assert_eq!(c.retry.max_retries, 2);
        assert!(c.return_results);
    }
}
