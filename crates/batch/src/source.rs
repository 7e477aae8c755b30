//! Shapes a batch's candidate filings can be supplied in.

use serde::{Deserialize, Serialize};

use rssformula_core::{BatchError, Filing, JobCandidate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Candidates built by the caller, used as given.
    Candidates(Vec<JobCandidate>),
    /// Document URLs or paths; the file name is the filing id.
    Urls(Vec<String>),
    /// Filings from a feed, processed newest first.
    Filings(Vec<Filing>),
}

impl CandidateSource {
    pub fn is_empty(&self) -> bool {
        match self {
            CandidateSource::Candidates(c) => c.is_empty(),
            CandidateSource::Urls(u) => u.is_empty(),
            CandidateSource::Filings(f) => f.is_empty(),
        }
    }

    /// Normalise into candidates in processing order.
    pub fn into_candidates(self) -> Result<Vec<JobCandidate>, BatchError> {
        match self {
            CandidateSource::Candidates(candidates) => Ok(candidates),
            CandidateSource::Urls(urls) => urls
                .into_iter()
                .map(|url| {
                    JobCandidate::from_url(url).map_err(|e| BatchError::input(e.to_string()))
                })
                .collect(),
            CandidateSource::Filings(mut filings) => {
                Filing::sort_newest_first(&mut filings);
                Ok(filings.into_iter().map(JobCandidate::from).collect())
            }
        }
    }
}

impl From<Vec<JobCandidate>> for CandidateSource {
    fn from(candidates: Vec<JobCandidate>) -> Self {
        CandidateSource::Candidates(candidates)
    }
}
