//! Engine-level errors

use thiserror::Error;

use crate::debugger::EngineStatus;
use crate::executor::ProgramError;

pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("line numbers start at 1, got {line} for {file_id}")]
    InvalidLine { file_id: String, line: usize },

    #[error("cannot move engine from {from:?} to {to:?}")]
    InvalidTransition { from: EngineStatus, to: EngineStatus },

    #[error("cannot read config {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session store: {0}")]
    Store(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to load program: {0}")]
    Program(#[from] ProgramError),
}
