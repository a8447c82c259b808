use std::fmt;

use thiserror::Error;

use super::StackEntry;

/// Marker embedded in an error's rendered message so its sequence index
/// survives sinks that only carry text.
pub const ERROR_TAG_PREFIX: &str = "[lua-debugger:error:";

/// Sequence index stamped on every error constructed under the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ErrorIndex(pub u64);

impl ErrorIndex {
    /// Recover an index from a rendered message, e.g. one that went
    /// through a plain-text logging sink.
    pub fn from_tagged(message: &str) -> Option<Self> {
        let start = message.rfind(ERROR_TAG_PREFIX)? + ERROR_TAG_PREFIX.len();
        let rest = &message[start..];
        let end = rest.find(']')?;
        rest[..end].parse().ok().map(ErrorIndex)
    }
}

impl fmt::Display for ErrorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An error raised by the interpreter while executing bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    /// Innermost entry first.
    pub stack: Vec<StackEntry>,
    pub index: Option<ErrorIndex>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            index: None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{} {}{}]", self.message, ERROR_TAG_PREFIX, index),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A failure from host code the interpreter called into.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
    /// Best-effort trace lines from the host side.
    pub backtrace: Vec<String>,
    /// Interpreter frames the failure surfaced through, innermost first.
    pub stack: Vec<StackEntry>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            backtrace: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Host(#[from] HostError),
}
