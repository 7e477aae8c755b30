use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Error code a loaded document carries when the filing itself was not loadable.
pub const NOT_LOADABLE_CODE: &str = "FileNotLoadable";

/// Everything one engine attempt needs.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    /// Filing URL, optionally followed by `|` and additional imports.
    pub url: &'a str,
    pub formula_artifact: &'a Path,
    pub extra_imports: &'a [PathBuf],
}

impl<'a> EngineRequest<'a> {
    pub fn new(url: &'a str, formula_artifact: &'a Path, extra_imports: &'a [PathBuf]) -> Self {
        Self {
            url,
            formula_artifact,
            extra_imports,
        }
    }

    /// Formula artifact followed by the extra imports, in import order.
    pub fn imports(&self) -> Vec<&'a Path> {
        std::iter::once(self.formula_artifact)
            .chain(self.extra_imports.iter().map(PathBuf::as_path))
            .collect()
    }
}

/// One evaluated value assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueAssertion {
    pub label: String,
    pub satisfied_count: u64,
    pub not_satisfied_count: u64,
}

impl ValueAssertion {
    pub fn new(label: impl Into<String>, satisfied_count: u64, not_satisfied_count: u64) -> Self {
        Self {
            label: label.into(),
            satisfied_count,
            not_satisfied_count,
        }
    }
}

/// Serialized output document generated by the formula run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub bytes: Vec<u8>,
    /// Text encoding the document declares (`None` means UTF-8).
    pub encoding: Option<String>,
}

impl OutputDocument {
    pub fn utf8(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            encoding: Some("utf-8".to_string()),
        }
    }
}

/// A document loaded and evaluated by the engine.
pub trait DocumentModel {
    /// Distinct error codes raised while loading/evaluating.
    fn errors(&self) -> BTreeSet<String>;

    fn value_assertions(&self) -> Vec<ValueAssertion>;

    fn output_document(&self) -> Option<OutputDocument>;

    /// The engine's accumulated processing log for this document.
    fn processing_log(&self) -> String;

    /// Release the document's resources.
    fn close(&mut self);

    /// `true` when the engine reported the filing itself as not loadable.
    fn is_not_loadable(&self) -> bool {
        self.errors().contains(NOT_LOADABLE_CODE)
    }
}

/// One stateful, non-reentrant engine instance.
///
/// Instances are never reused across attempts; the worker creates a fresh one
/// through an `EngineFactory` each time.
pub trait ValidationEngine {
    type Document: DocumentModel;

    /// Load the filing at `request.url`, import the formula artifacts, and
    /// evaluate.
    fn run(&mut self, request: &EngineRequest<'_>) -> Result<Self::Document, EngineError>;

    /// Release the instance. Called exactly once, whatever the outcome.
    fn close(&mut self);
}

/// Creates fresh engine instances.
pub trait EngineFactory: Send + Sync {
    type Engine: ValidationEngine;

    fn create(&self) -> Result<Self::Engine, EngineError>;
}

impl<F> EngineFactory for std::sync::Arc<F>
where
    F: EngineFactory + ?Sized,
{
    type Engine = F::Engine;

    fn create(&self) -> Result<Self::Engine, EngineError> {
        (**self).create()
    }
}
