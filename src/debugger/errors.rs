use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use super::stepping::SourceLocation;
use crate::interp::{ErrorIndex, HostError, RuntimeError, StackEntry};

const HOST_CALL_PREFIX: &str = "Error in host call: ";

/// What the client is told about one error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub index: ErrorIndex,
    pub file_id: Option<String>,
    pub line_number: Option<usize>,
    pub message: String,
}

/// Stamps every error with a sequence index and the last executed
/// position, and logs each index at most once.
#[derive(Default)]
pub struct ErrorCorrelator {
    next_index: u64,
    records: HashMap<ErrorIndex, ErrorRecord>,
    reported: HashSet<ErrorIndex>,
    log: Vec<ErrorRecord>,
}

impl ErrorCorrelator {
    pub fn create(&mut self, message: String, position: Option<&SourceLocation>) -> RuntimeError {
        let index = ErrorIndex(self.next_index);
        self.next_index += 1;

        let record = ErrorRecord {
            index,
            file_id: position.map(|p| p.url.clone()),
            line_number: position.map(|p| p.line),
            message: message.clone(),
        };
        debug!(%index, ?position, "error created");
        self.records.insert(index, record);

        RuntimeError {
            message,
            stack: Vec::new(),
            index: Some(index),
        }
    }

    /// Give an error that was raised outside the debugger an index, keeping
    /// whatever stack it already carries.
    pub fn adopt(&mut self, err: RuntimeError, position: Option<&SourceLocation>) -> RuntimeError {
        if err.index.is_some_and(|index| self.records.contains_key(&index)) {
            return err;
        }
        let mut adopted = self.create(err.message, position);
        adopted.stack = err.stack;
        adopted
    }

    /// Turn a host failure into a runtime error. The host's own trace lines
    /// are folded into the message since they have no frame to point at;
    /// the interpreter frames it surfaced through are kept.
    pub fn wrap_host(&mut self, err: HostError, position: Option<&SourceLocation>) -> RuntimeError {
        let mut message = format!("{}{}", HOST_CALL_PREFIX, err.message);
        for line in &err.backtrace {
            message.push_str("\n    ");
            message.push_str(line);
        }
        let mut wrapped = self.create(message, position);
        wrapped.stack = err.stack;
        wrapped
    }

    /// Annotate with the frame the failure surfaced in.
    pub fn tag(err: &mut RuntimeError, entry: StackEntry) {
        if !err.stack.contains(&entry) {
            err.stack.push(entry);
        }
    }

    /// Log the error for `index` the first time it is seen. Returns the
    /// record only on that first sighting.
    pub fn correlate(&mut self, index: ErrorIndex) -> Option<ErrorRecord> {
        let Some(record) = self.records.get(&index) else {
            warn!(%index, "uncaught error with unknown index");
            return None;
        };
        if !self.reported.insert(index) {
            debug!(%index, "error already reported");
            return None;
        }
        self.log.push(record.clone());
        Some(record.clone())
    }

    /// Fallback for errors that only survived as text.
    pub fn correlate_message(&mut self, message: &str) -> Option<ErrorRecord> {
        ErrorIndex::from_tagged(message).and_then(|index| self.correlate(index))
    }

    pub fn record(&self, index: ErrorIndex) -> Option<&ErrorRecord> {
        self.records.get(&index)
    }

    pub fn log(&self) -> &[ErrorRecord] {
        &self.log
    }
}
