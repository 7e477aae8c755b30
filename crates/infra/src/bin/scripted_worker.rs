//! Worker child backed by the scripted engine.
//!
//! Serves one work request over stdin/stdout. Every filing loads with the
//! scripted default document unless `RSSFORMULA_SCRIPTED_NOT_LOADABLE` is
//! set, in which case every attempt reports the filing as not loadable with
//! that reason.

use rssformula_engine::{ScriptedEngineFactory, ScriptedOutcome};

const NOT_LOADABLE_ENV: &str = "RSSFORMULA_SCRIPTED_NOT_LOADABLE";

fn main() -> anyhow::Result<()> {
    let mut factory = ScriptedEngineFactory::new();
    if let Ok(reason) = std::env::var(NOT_LOADABLE_ENV) {
        factory = factory.with_default(ScriptedOutcome::NotLoadable(reason));
    }
    rssformula_infra::serve_stdio(factory)
}
