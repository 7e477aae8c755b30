//! Resolution of the batch's formula into one on-disk artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rssformula_core::{BatchError, FormulaId, FormulaPackage};
use rssformula_infra::FormulaCatalog;

const TEMP_PREFIX: &str = "rssDB_formula_";

/// Where the formula comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaSource {
    /// Formula linkbase text.
    pub text: Option<String>,
    /// Formula file on disk.
    pub file_path: Option<PathBuf>,
    /// Write `text` back into `file_path` before running.
    pub write_back: bool,
}

impl FormulaSource {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_write_back(mut self, write_back: bool) -> Self {
        self.write_back = write_back;
        self
    }
}

/// Turns a [`FormulaSource`] into a [`FormulaPackage`].
#[derive(Debug, Clone)]
pub struct FormulaPackageResolver {
    temp_dir: PathBuf,
}

impl FormulaPackageResolver {
    /// `temp_dir` must exist; generated artifacts are written there.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self, BatchError> {
        let temp_dir = temp_dir.into();
        if !temp_dir.is_dir() {
            return Err(BatchError::input(format!(
                "temp dir {} does not exist",
                temp_dir.display()
            )));
        }
        Ok(Self { temp_dir })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn resolve(
        &self,
        formula_id: FormulaId,
        source: &FormulaSource,
    ) -> Result<FormulaPackage, BatchError> {
        let package = match (&source.text, &source.file_path) {
            (None, None) => {
                return Err(BatchError::input(
                    "either formula text or a formula file must be given",
                ));
            }
            (_, None) if source.write_back => {
                return Err(BatchError::input(
                    "writing the formula back requires a formula file path",
                ));
            }
            (Some(text), None) => {
                let content = canonicalize(text.as_bytes())?;
                self.stage(formula_id, content, None)?
            }
            (None, Some(path)) => {
                let bytes = fs::read(path).map_err(|e| BatchError::io(path, e))?;
                let content = canonicalize(&bytes)?;
                FormulaPackage {
                    formula_id,
                    artifact_path: path.clone(),
                    raw_content: Some(content.into_bytes()),
                    provenance: Some(path.clone()),
                    is_temporary: false,
                }
            }
            (Some(text), Some(path)) => {
                let content = canonicalize(text.as_bytes())?;
                if source.write_back {
                    fs::write(path, content.as_bytes()).map_err(|e| BatchError::io(path, e))?;
                    info!(formula_id = %formula_id, path = %path.display(), "formula written back");
                }
                self.stage(formula_id, content, Some(path.clone()))?
            }
        };

        debug!(
            formula_id = %formula_id,
            artifact = %package.artifact_path.display(),
            temporary = package.is_temporary,
            "formula resolved"
        );
        Ok(package)
    }

    /// Resolve a formula registered in `catalog`.
    pub fn resolve_from_catalog<C: FormulaCatalog + ?Sized>(
        &self,
        catalog: &C,
        formula_id: FormulaId,
    ) -> Result<FormulaPackage, BatchError> {
        let record = catalog
            .get_formula(formula_id)
            .map_err(|e| BatchError::fatal(format!("formula lookup failed: {e}")))?
            .ok_or_else(|| BatchError::fatal(format!("formula id {formula_id} was not found")))?;

        let text = record
            .formula_linkbase
            .ok_or_else(|| BatchError::fatal(format!("formula id {formula_id} has no linkbase")))?;

        let mut package = self.resolve(formula_id, &FormulaSource::text(text))?;
        package.provenance = record.file_name.map(PathBuf::from);
        Ok(package)
    }

    /// Write `content` to a new, uniquely named file in the temp dir. The file
    /// is kept; [`FormulaPackage::cleanup`] removes it.
    fn stage(
        &self,
        formula_id: FormulaId,
        content: String,
        provenance: Option<PathBuf>,
    ) -> Result<FormulaPackage, BatchError> {
        let prefix = format!(
            "{TEMP_PREFIX}id_{}_{}_",
            formula_id,
            Local::now().format("%Y%m%d%H%M%S%6f")
        );

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".xml")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| BatchError::io(&self.temp_dir, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| BatchError::io(file.path(), e))?;
        let (_, artifact_path) = file.keep().map_err(|e| {
            let path = e.file.path().to_path_buf();
            BatchError::io(path, e.error)
        })?;

        Ok(FormulaPackage {
            formula_id,
            artifact_path,
            raw_content: Some(content.into_bytes()),
            provenance,
            is_temporary: true,
        })
    }
}

/// Canonical formula text: UTF-8 without BOM, `\n` line endings, trimmed.
pub fn canonicalize(bytes: &[u8]) -> Result<String, BatchError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| BatchError::input(format!("formula is not valid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text.trim();
    if text.is_empty() {
        return Err(BatchError::input("formula is empty"));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rssformula_infra::{FormulaRecord, InMemoryResultStore};

    const FORMULA: &str = "<linkbase>\r\n  <assertion/>\r\n</linkbase>\n";
    const CANONICAL: &str = "<linkbase>\n  <assertion/>\n</linkbase>";

    fn resolver(dir: &Path) -> FormulaPackageResolver {
        FormulaPackageResolver::new(dir).unwrap()
    }

    fn temp_artifacts(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with("rssDB_formula_id_7_")
            })
            .collect()
    }

    #[test]
    fn nothing_given_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolver(dir.path())
            .resolve(FormulaId::new(7), &FormulaSource::default())
            .unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn write_back_without_file_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolver(dir.path())
            .resolve(
                FormulaId::new(7),
                &FormulaSource::text(FORMULA).with_write_back(true),
            )
            .unwrap_err();
        assert!(err.is_input());
        assert!(temp_artifacts(dir.path()).is_empty());
    }

    #[test]
    fn text_only_is_staged_in_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let package = resolver(dir.path())
            .resolve(FormulaId::new(7), &FormulaSource::text(FORMULA))
            .unwrap();

        assert!(package.is_temporary);
        assert!(package.provenance.is_none());
        assert_eq!(package.artifact_path.parent().unwrap(), dir.path());
        let name = package.artifact_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("rssDB_formula_id_7_"));
        assert!(name.ends_with(".xml"));
        assert_eq!(fs::read_to_string(&package.artifact_path).unwrap(), CANONICAL);

        assert!(package.cleanup().unwrap());
        assert!(!package.artifact_path.exists());
    }

    #[test]
    fn file_only_is_used_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formula.xml");
        fs::write(&path, FORMULA).unwrap();

        let package = resolver(dir.path())
            .resolve(FormulaId::new(7), &FormulaSource::file(&path))
            .unwrap();

        assert_eq!(package.artifact_path, path);
        assert!(!package.is_temporary);
        assert_eq!(package.raw_content.as_deref(), Some(CANONICAL.as_bytes()));
        assert!(!package.cleanup().unwrap());
        assert!(path.exists());
    }

    #[test]
    fn text_wins_over_file_without_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formula.xml");
        fs::write(&path, "<old/>").unwrap();

        let package = resolver(dir.path())
            .resolve(FormulaId::new(7), &FormulaSource::text(FORMULA).with_file(&path))
            .unwrap();

        assert!(package.is_temporary);
        assert_eq!(package.provenance.as_deref(), Some(path.as_path()));
        assert_eq!(package.file_name(), path.as_path());
        assert_eq!(fs::read_to_string(&path).unwrap(), "<old/>");
    }

    #[test]
    fn write_back_overwrites_file_and_stages_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formula.xml");
        fs::write(&path, "<old/>").unwrap();

        let package = resolver(dir.path())
            .resolve(
                FormulaId::new(7),
                &FormulaSource::text(FORMULA).with_file(&path).with_write_back(true),
            )
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), CANONICAL);
        assert_ne!(package.artifact_path, path);
        assert_eq!(fs::read_to_string(&package.artifact_path).unwrap(), CANONICAL);
    }

    #[test]
    fn canonical_form_rejects_empty_and_non_utf8() {
        assert!(canonicalize(b"  \r\n ").unwrap_err().is_input());
        assert!(canonicalize(&[0xff, 0xfe, 0x00]).unwrap_err().is_input());
        assert_eq!(canonicalize("\u{feff}<a/>".as_bytes()).unwrap(), "<a/>");
    }

    #[test]
    fn missing_temp_dir_is_rejected() {
        assert!(FormulaPackageResolver::new("/definitely/not/here").is_err());
    }

    #[test]
    fn catalog_formula_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = InMemoryResultStore::new();
        catalog
            .add_formula(FormulaRecord {
                formula_id: FormulaId::new(7),
                file_name: Some("assertions.xml".into()),
                formula_linkbase: Some(FORMULA.into()),
                description: None,
            })
            .unwrap();

        let r = resolver(dir.path());
        let package = r.resolve_from_catalog(&catalog, FormulaId::new(7)).unwrap();
        assert!(package.is_temporary);
        assert_eq!(package.file_name(), Path::new("assertions.xml"));

        let err = r.resolve_from_catalog(&catalog, FormulaId::new(8)).unwrap_err();
        assert!(matches!(err, BatchError::Fatal(_)));
    }
}
