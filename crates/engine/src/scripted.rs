//! Scripted in-memory engine.
//!
//! Intended for tests/dev. Outcomes are scripted per URL; every instance the
//! factory hands out is tracked so callers can check that instances are
//! closed and never reused.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::contract::{
    DocumentModel, EngineFactory, EngineRequest, NOT_LOADABLE_CODE, OutputDocument,
    ValidationEngine, ValueAssertion,
};
use crate::error::EngineError;

/// Document returned by a scripted run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedDocument {
    errors: BTreeSet<String>,
    assertions: Vec<ValueAssertion>,
    output: Option<OutputDocument>,
    log: String,
}

impl ScriptedDocument {
    /// A loaded document carrying the engine's not-loadable error code.
    pub fn not_loadable(reason: impl Into<String>) -> Self {
        Self::default()
            .with_error(NOT_LOADABLE_CODE)
            .with_error(reason)
    }

    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.errors.insert(code.into());
        self
    }

    pub fn with_assertion(mut self, assertion: ValueAssertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_output(mut self, output: OutputDocument) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = log.into();
        self
    }
}

impl DocumentModel for ScriptedDocument {
    fn errors(&self) -> BTreeSet<String> {
        self.errors.clone()
    }

    fn value_assertions(&self) -> Vec<ValueAssertion> {
        self.assertions.clone()
    }

    fn output_document(&self) -> Option<OutputDocument> {
        self.output.clone()
    }

    fn processing_log(&self) -> String {
        self.log.clone()
    }

    fn close(&mut self) {}
}

/// What one scripted attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Loaded(ScriptedDocument),
    NotLoadable(String),
    Fail(String),
}

#[derive(Debug)]
struct Shared {
    scripts: HashMap<String, VecDeque<ScriptedOutcome>>,
    last: HashMap<String, ScriptedOutcome>,
    default: ScriptedOutcome,
    creation_error: Option<String>,
    calls: Vec<String>,
    created: usize,
    closed: usize,
}

/// Factory of scripted engines.
///
/// Each URL consumes its script front to back; once exhausted, the last
/// outcome repeats (so a single `NotLoadable` models a permanently
/// unreachable filing). Unscripted URLs get the default outcome.
#[derive(Debug, Clone)]
pub struct ScriptedEngineFactory {
    shared: Arc<Mutex<Shared>>,
}

impl Default for ScriptedEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngineFactory {
    pub fn new() -> Self {
        let default_doc = ScriptedDocument::default()
            .with_assertion(ValueAssertion::new("assertion", 1, 0))
            .with_output(OutputDocument::utf8("<xbrl/>"))
            .with_log("loaded");
        Self {
            shared: Arc::new(Mutex::new(Shared {
                scripts: HashMap::new(),
                last: HashMap::new(),
                default: ScriptedOutcome::Loaded(default_doc),
                creation_error: None,
                calls: Vec::new(),
                created: 0,
                closed: 0,
            })),
        }
    }

    pub fn with_default(self, outcome: ScriptedOutcome) -> Self {
        self.lock().default = outcome;
        self
    }

    pub fn script(self, url: impl Into<String>, outcomes: Vec<ScriptedOutcome>) -> Self {
        self.lock().scripts.insert(url.into(), outcomes.into());
        self
    }

    /// Make `create()` fail.
    pub fn failing_creation(self, msg: impl Into<String>) -> Self {
        self.lock().creation_error = Some(msg.into());
        self
    }

    /// URLs run so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn attempts_for(&self, url: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == url).count()
    }

    pub fn created(&self) -> usize {
        self.lock().created
    }

    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineFactory for ScriptedEngineFactory {
    type Engine = ScriptedEngine;

    fn create(&self) -> Result<ScriptedEngine, EngineError> {
        let mut shared = self.lock();
        if let Some(msg) = &shared.creation_error {
            return Err(EngineError::Unavailable(msg.clone()));
        }
        shared.created += 1;
        Ok(ScriptedEngine {
            shared: self.shared.clone(),
            used: false,
            closed: false,
        })
    }
}

/// One scripted engine instance.
#[derive(Debug)]
pub struct ScriptedEngine {
    shared: Arc<Mutex<Shared>>,
    used: bool,
    closed: bool,
}

impl ValidationEngine for ScriptedEngine {
    type Document = ScriptedDocument;

    fn run(&mut self, request: &EngineRequest<'_>) -> Result<ScriptedDocument, EngineError> {
        if self.used {
            return Err(EngineError::failed("engine instance reused"));
        }
        self.used = true;

        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.calls.push(request.url.to_string());

        let next = shared
            .scripts
            .get_mut(request.url)
            .and_then(VecDeque::pop_front);
        let outcome = match next {
            Some(outcome) => {
                shared.last.insert(request.url.to_string(), outcome.clone());
                outcome
            }
            None => shared
                .last
                .get(request.url)
                .cloned()
                .unwrap_or_else(|| shared.default.clone()),
        };

        match outcome {
            ScriptedOutcome::Loaded(doc) => Ok(doc),
            ScriptedOutcome::NotLoadable(reason) => {
                Err(EngineError::not_loadable(request.url, reason))
            }
            ScriptedOutcome::Fail(msg) => Err(EngineError::Failed(msg)),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed += 1;
    }
}
