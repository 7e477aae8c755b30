use thiserror::Error;

/// Failure of one engine attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The filing could not be fetched or is not a loadable document.
    /// Retryable with a fresh engine instance.
    #[error("document not loadable: {url}: {}", reasons.join(", "))]
    DocumentNotLoadable { url: String, reasons: Vec<String> },

    /// Any other failure during an attempt. Not retried.
    #[error("engine failed: {0}")]
    Failed(String),

    /// No engine instance could be created.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn not_loadable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DocumentNotLoadable {
            url: url.into(),
            reasons: vec![reason.into()],
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DocumentNotLoadable { .. })
    }
}
