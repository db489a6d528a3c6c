//! Config-file error reporting. Grounded on the teacher's
//! `src/cfg/error.rs` shape (a dedicated error type carrying source
//! location plus a help message) but simplified to spec.md §7's
//! `error[LINE]: message` line-oriented format instead of `miette`
//! span diagnostics — this config language is INI-like and line-based,
//! not an s-expression tree with nested spans.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("error[{line}]: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl ConfigError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

/// Accumulates errors across a whole file load instead of failing at the
/// first one, per spec.md §7's "the offending binding is skipped; the
/// rest of the file loads".
#[derive(Default)]
pub struct ErrorSink {
    pub errors: Vec<ConfigError>,
}

impl ErrorSink {
    pub fn push(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(ConfigError::new(line, message));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}
