//! Engine configuration

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DebuggerError, Result};
use crate::interp::opcode;

/// Tunables for a debugging session. Every field has a default, so an
/// empty JSON object is a valid configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Delay before an automatic step-in while auto-stepping.
    pub auto_step_delay_ms: u64,
    /// Initial "stop at breakpoints" flag when the store has none.
    pub stop_at_breakpoints: bool,
    /// Opcodes that never suspend (closure declarations).
    pub excluded_opcodes: Vec<u8>,
    /// Opcodes after which a step target no longer applies.
    pub step_clearing_opcodes: Vec<u8>,
    /// Global names hidden from snapshots.
    pub hidden_globals: Vec<String>,
    /// Interpreter bookkeeping key hidden from globals and table fields.
    pub bookkeeping_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_step_delay_ms: 500,
            stop_at_breakpoints: true,
            excluded_opcodes: vec![opcode::CLOSE, opcode::CLOSURE],
            step_clearing_opcodes: vec![opcode::RETURN, opcode::CLOSE],
            hidden_globals: vec!["_G".to_string()],
            bookkeeping_key: "__vm".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| DebuggerError::Config {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn auto_step_delay(&self) -> Duration {
        Duration::from_millis(self.auto_step_delay_ms)
    }

    pub fn is_hidden_global(&self, name: &str) -> bool {
        name == self.bookkeeping_key || self.hidden_globals.iter().any(|g| g == name)
    }
}
