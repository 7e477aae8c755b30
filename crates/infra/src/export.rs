//! Export of output documents to a folder.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::debug;

use rssformula_core::{JobKey, JobResult};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no output document to export for {0}")]
    NoOutput(JobKey),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes each result's output document to
/// `<folder>/rssDBFormula_formulaId_<id>_filingId_<id>_on_<YYYYMMDDHHMM>.xml`.
#[derive(Debug, Clone)]
pub struct ResultExporter {
    folder: PathBuf,
}

impl ResultExporter {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn file_name(result: &JobResult, at: NaiveDateTime) -> String {
        format!(
            "rssDBFormula_formulaId_{}_filingId_{}_on_{}.xml",
            result.formula_id,
            result.filing_id.file_name_safe(),
            at.format("%Y%m%d%H%M")
        )
    }

    /// Write `result`'s output document (UTF-8), creating the folder if needed.
    pub fn export(&self, result: &JobResult) -> Result<PathBuf, ExportError> {
        let output = result
            .output_document
            .as_deref()
            .ok_or_else(|| ExportError::NoOutput(result.key()))?;

        fs::create_dir_all(&self.folder).map_err(|source| ExportError::Io {
            path: self.folder.clone(),
            source,
        })?;

        let path = self
            .folder
            .join(Self::file_name(result, Local::now().naive_local()));
        fs::write(&path, output.as_bytes()).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), filing_id = %result.filing_id, "output document exported");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rssformula_core::{FilingId, FormulaId};

    fn result(filing: &str, output: Option<&str>) -> JobResult {
        let key = JobKey::new(FilingId::new(filing).unwrap(), FormulaId::new(7));
        let mut r = JobResult::failed(&key, false, "", 1);
        r.errors = None;
        r.output_document = output.map(str::to_string);
        r
    }

    #[test]
    fn file_name_replaces_dots_in_filing_id() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 59)
            .unwrap();
        assert_eq!(
            ResultExporter::file_name(&result("abc.xml", None), at),
            "rssDBFormula_formulaId_7_filingId_abc_xml_on_202403091405.xml"
        );
    }

    #[test]
    fn export_creates_folder_and_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ResultExporter::new(dir.path().join("nested").join("out"));

        let path = exporter.export(&result("10", Some("<out/>"))).unwrap();

        assert!(path.starts_with(exporter.folder()));
        assert_eq!(fs::read_to_string(path).unwrap(), "<out/>");
    }

    #[test]
    fn export_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ResultExporter::new(dir.path());
        assert!(matches!(
            exporter.export(&result("10", None)),
            Err(ExportError::NoOutput(_))
        ));
    }
}
