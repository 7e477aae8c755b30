//! Filings and the job candidates derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{FilingId, FormulaId};
use crate::job::JobKey;

/// One remote document instance, as discovered from a feed or supplied by the
/// caller. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filing {
    pub filing_id: FilingId,
    pub url: String,
    pub is_inline_document: bool,
    pub pub_date: DateTime<Utc>,
}

impl Filing {
    pub fn new(
        filing_id: FilingId,
        url: impl Into<String>,
        is_inline_document: bool,
        pub_date: DateTime<Utc>,
    ) -> Self {
        Self {
            filing_id,
            url: url.into(),
            is_inline_document,
            pub_date,
        }
    }

    /// Sort newest publication first (the usual batch order). Stable for equal dates.
    pub fn sort_newest_first(filings: &mut [Filing]) {
        filings.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
    }
}

/// Where a candidate came from; carried through for logging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SourceRef {
    /// A filing discovered from a feed/store query.
    Feed { pub_date: DateTime<Utc> },
    /// A URL supplied directly by the caller.
    Url,
    /// Caller-defined origin.
    Other(String),
}

/// One filing that may become a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCandidate {
    pub filing_id: FilingId,
    pub url: String,
    pub is_inline_document: bool,
    pub source_ref: SourceRef,
}

impl JobCandidate {
    pub fn new(filing_id: FilingId, url: impl Into<String>, is_inline_document: bool) -> Self {
        Self {
            filing_id,
            url: url.into(),
            is_inline_document,
            source_ref: SourceRef::Other(String::new()),
        }
    }

    /// Build a candidate from a bare document URL or path.
    ///
    /// The filing id is the document's file name; `.htm`/`.html` documents are
    /// treated as inline documents.
    pub fn from_url(url: impl Into<String>) -> Result<Self, DomainError> {
        let url = url.into();
        let trimmed = url.trim();
        let name = trimmed
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        let filing_id = FilingId::new(name)
            .map_err(|_| DomainError::validation(format!("no document name in url '{url}'")))?;
        let lower = name.to_ascii_lowercase();
        let is_inline_document = lower.ends_with(".htm") || lower.ends_with(".html");

        Ok(Self {
            filing_id,
            url: trimmed.to_string(),
            is_inline_document,
            source_ref: SourceRef::Url,
        })
    }

    pub fn key(&self, formula_id: FormulaId) -> JobKey {
        JobKey::new(self.filing_id.clone(), formula_id)
    }

    /// URL the engine should load.
    ///
    /// Inline documents are evaluated through their extracted instance, which
    /// is published next to the inline document as `<stem>_htm.xml`.
    pub fn instance_url(&self) -> String {
        if !self.is_inline_document {
            return self.url.clone();
        }
        extracted_instance_url(&self.url)
    }
}

impl From<Filing> for JobCandidate {
    fn from(filing: Filing) -> Self {
        Self {
            filing_id: filing.filing_id,
            url: filing.url,
            is_inline_document: filing.is_inline_document,
            source_ref: SourceRef::Feed {
                pub_date: filing.pub_date,
            },
        }
    }
}

// The instance is assumed to exist. When it does not, the engine reports the
// filing as not loadable and the job fails through the retry path; there is no
// fallback to the filing index page.
fn extracted_instance_url(url: &str) -> String {
    let name_start = url.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let stem_end = url[name_start..]
        .rfind('.')
        .map(|i| name_start + i)
        .unwrap_or(url.len());
    format!("{}_htm.xml", &url[..stem_end])
}
