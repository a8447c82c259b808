use std::collections::BTreeMap;

use tracing::info;

use crate::error::{DebuggerError, Result};

/// File identifier -> flags indexed by `line - 1`. Missing entries are off.
pub type BreakpointMap = BTreeMap<String, Vec<bool>>;

pub struct Breakpoints {
    points: BreakpointMap,
    stop_at_breakpoints: bool,
}

impl Breakpoints {
    pub fn new(points: BreakpointMap, stop_at_breakpoints: bool) -> Self {
        Self {
            points,
            stop_at_breakpoints,
        }
    }

    /// Flip the breakpoint at a 1-based line and return its new state.
    pub fn toggle(&mut self, file_id: &str, line: usize) -> Result<bool> {
        if line < 1 {
            return Err(DebuggerError::InvalidLine {
                file_id: file_id.to_string(),
                line,
            });
        }

        let flags = self.points.entry(file_id.to_string()).or_default();
        let index = line - 1;
        if flags.len() <= index {
            flags.resize(index + 1, false);
        }
        flags[index] = !flags[index];

        let is_set = flags[index];
        info!(file_id, line, is_set, "breakpoint toggled");
        Ok(is_set)
    }

    pub fn contains(&self, file_id: &str, line: usize) -> bool {
        line >= 1
            && self
                .points
                .get(file_id)
                .and_then(|flags| flags.get(line - 1))
                .copied()
                .unwrap_or(false)
    }

    /// A set breakpoint only counts while stopping at breakpoints is on.
    pub fn should_stop_at(&self, file_id: &str, line: usize) -> bool {
        self.stop_at_breakpoints && self.contains(file_id, line)
    }

    pub fn stop_at_breakpoints(&self) -> bool {
        self.stop_at_breakpoints
    }

    pub fn toggle_stop_at_breakpoints(&mut self) -> bool {
        self.stop_at_breakpoints = !self.stop_at_breakpoints;
        info!(stop = self.stop_at_breakpoints, "stop at breakpoints toggled");
        self.stop_at_breakpoints
    }

    /// Make sure a loaded file shows up in the map, even with no flags.
    pub fn ensure_file(&mut self, file_id: &str) {
        self.points.entry(file_id.to_string()).or_default();
    }

    pub fn map(&self) -> &BreakpointMap {
        &self.points
    }
}
