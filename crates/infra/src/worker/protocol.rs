//! Worker wire protocol.
//!
//! The parent writes one JSON [`WorkRequest`] to the child's stdin and closes
//! it. The child answers with one JSON [`WorkResponse`] line on stdout and
//! exits 0.

use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use rssformula_core::{JobKey, JobResult};
use rssformula_engine::EngineFactory;

use super::executor::WorkerExecutor;
use super::types::RetryPolicy;

/// Everything a worker needs to run one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub job: JobKey,
    /// URL the engine loads (the extracted instance for inline filings).
    pub url: String,
    pub is_inline_document: bool,
    pub artifact_path: PathBuf,
    #[serde(default)]
    pub extra_imports: Vec<PathBuf>,
    /// `|`-separated documents loaded alongside the filing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_imports: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl WorkRequest {
    pub fn new(job: JobKey, url: impl Into<String>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            job,
            url: url.into(),
            is_inline_document: false,
            artifact_path: artifact_path.into(),
            extra_imports: Vec::new(),
            additional_imports: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn inline(mut self, is_inline_document: bool) -> Self {
        self.is_inline_document = is_inline_document;
        self
    }

    pub fn with_extra_imports(mut self, extra_imports: Vec<PathBuf>) -> Self {
        self.extra_imports = extra_imports;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_additional_imports(mut self, additional_imports: Option<String>) -> Self {
        self.additional_imports = additional_imports;
        self
    }

    /// What the engine is asked to load: the URL, followed by `|` and the
    /// additional imports when there are any.
    pub fn input_file(&self) -> Cow<'_, str> {
        match self.additional_imports.as_deref().map(str::trim) {
            Some(imports) if !imports.is_empty() => Cow::Owned(format!("{}|{imports}", self.url)),
            _ => Cow::Borrowed(&self.url),
        }
    }
}

/// Child's answer: `{"result": JobResult}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkResponse {
    Result(JobResult),
    Error(String),
}

/// Serve one work request: read it from `input`, run it, answer on `output`.
///
/// A malformed request is answered with an error response; only I/O on the
/// two streams fails the call.
pub fn serve<F, R, W>(factory: F, mut input: R, mut output: W) -> anyhow::Result<()>
where
    F: EngineFactory,
    R: Read,
    W: Write,
{
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("failed to read work request")?;

    let response = match serde_json::from_str::<WorkRequest>(&raw) {
        Ok(request) => WorkResponse::Result(WorkerExecutor::new(factory).execute(&request)),
        Err(e) => {
            tracing::error!(error = %e, "malformed work request");
            WorkResponse::Error(format!("malformed work request: {e}"))
        }
    };

    let line = serde_json::to_string(&response).context("failed to encode work response")?;
    writeln!(output, "{line}").context("failed to write work response")?;
    output.flush().context("failed to flush work response")?;
    Ok(())
}

/// [`serve`] over the process's stdin and stdout.
pub fn serve_stdio<F: EngineFactory>(factory: F) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(factory, stdin.lock(), stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rssformula_core::{FilingId, FormulaId};
    use rssformula_engine::{ScriptedEngineFactory, ScriptedOutcome};

    fn request() -> WorkRequest {
        WorkRequest::new(
            JobKey::new(FilingId::from(42), FormulaId::new(7)),
            "https://example.test/42.xml",
            "/tmp/formula.xml",
        )
        .with_retry(RetryPolicy::immediate(3))
    }

    #[test]
    fn request_uses_camel_case_fields() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["job"]["filingId"], "42");
        assert_eq!(json["isInlineDocument"], false);
        assert_eq!(json["artifactPath"], "/tmp/formula.xml");
        assert!(json["extraImports"].as_array().unwrap().is_empty());
    }

    #[test]
    fn additional_imports_are_joined_onto_the_input() {
        assert_eq!(request().input_file(), "https://example.test/42.xml");
        assert_eq!(
            request().with_additional_imports(Some("  ".into())).input_file(),
            "https://example.test/42.xml"
        );
        assert_eq!(
            request()
                .with_additional_imports(Some("a.xsd|b.xml".into()))
                .input_file(),
            "https://example.test/42.xml|a.xsd|b.xml"
        );

        let json = serde_json::to_value(request()).unwrap();
        assert!(json.get("additionalImports").is_none());
    }

    #[test]
    fn response_is_externally_tagged() {
        let json = serde_json::to_value(WorkResponse::Error("boom".into())).unwrap();
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn serve_answers_with_one_result_line() {
        let input = serde_json::to_vec(&request()).unwrap();
        let mut out = Vec::new();
        serve(ScriptedEngineFactory::new(), input.as_slice(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        match serde_json::from_str::<WorkResponse>(text.trim()).unwrap() {
            WorkResponse::Result(r) => {
                assert_eq!(r.key(), request().job);
                assert!(!r.is_failed());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn serve_caps_the_retry_count_of_incoming_requests() {
        let factory = ScriptedEngineFactory::new()
            .with_default(ScriptedOutcome::NotLoadable("unreachable".into()));
        let input = serde_json::to_vec(&request().with_retry(RetryPolicy::immediate(10))).unwrap();
        let mut out = Vec::new();
        serve(factory.clone(), input.as_slice(), &mut out).unwrap();

        match serde_json::from_slice::<WorkResponse>(&out).unwrap() {
            WorkResponse::Result(r) => {
                assert!(r.is_failed());
                assert_eq!(r.attempts, 4);
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(factory.attempts_for("https://example.test/42.xml"), 4);
    }

    #[test]
    fn serve_reports_malformed_requests() {
        let mut out = Vec::new();
        serve(ScriptedEngineFactory::new(), &b"{not json"[..], &mut out).unwrap();
        let response: WorkResponse = serde_json::from_slice(&out).unwrap();
        assert!(matches!(response, WorkResponse::Error(msg) if msg.contains("malformed")));
    }
}
