//! Tracing and logging setup shared by batch hosts and worker binaries.

/// Initialize process-wide logging with the format from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{FORMAT_ENV, LogFormat, ParseLogFormatError, init_with};
