//! Compiled chunk format (`*.lua.json`).

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::interp::{LocalVar, Value};

/// Operand encoding marker: an RK operand at or above this indexes the
/// constant table.
pub const RK_CONSTANT: i32 = 256;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid chunk: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<i32>")]
pub struct Instruction {
    pub op: u8,
    pub a: i32,
    pub b: i32,
    pub c: i32,
}

impl TryFrom<Vec<i32>> for Instruction {
    type Error = String;

    fn try_from(raw: Vec<i32>) -> Result<Self, Self::Error> {
        let op = match raw.first() {
            Some(&op) if (0..=u8::MAX as i32).contains(&op) => op as u8,
            Some(op) => return Err(format!("opcode {} out of range", op)),
            None => return Err("empty instruction".to_string()),
        };
        if raw.len() > 4 {
            return Err(format!("instruction has {} fields, expected at most 4", raw.len()));
        }
        let field = |i: usize| raw.get(i).copied().unwrap_or(0);
        Ok(Self {
            op,
            a: field(1),
            b: field(2),
            c: field(3),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::String(s.clone()),
        }
    }
}

/// One function prototype.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proto {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub num_params: usize,
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub locals: Vec<LocalVar>,
    /// Upvalue names, in capture order.
    #[serde(default)]
    pub upvalues: Vec<String>,
    /// Source line of each instruction.
    #[serde(default)]
    pub line_positions: Vec<usize>,
    #[serde(default)]
    pub protos: Vec<Proto>,
}

impl Proto {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("function")
    }

    pub fn line_at(&self, pc: usize) -> usize {
        self.line_positions.get(pc).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default)]
    pub source_name: Option<String>,
    /// Source file location, relative to the chunk.
    #[serde(default)]
    pub source_path: Option<String>,
    pub main: Proto,
}

impl Chunk {
    pub fn from_file(path: &Path) -> Result<Self, ProgramError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ProgramError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ProgramError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_chunk_with_short_instructions() {
        let chunk = Chunk::from_value(json!({
            "sourceName": "a.lua",
            "main": {
                "instructions": [[1, 0, 0], [30, 0, 1, 0]],
                "constants": [1, "x", true, null],
                "locals": [{"varname": "n", "startpc": 1, "endpc": 2}],
                "linePositions": [1, 2]
            }
        }))
        .unwrap();

        assert_eq!(
            chunk.main.instructions[0],
            Instruction { op: 1, a: 0, b: 0, c: 0 }
        );
        assert_eq!(
            chunk.main.constants,
            vec![
                Constant::Number(1.0),
                Constant::String("x".into()),
                Constant::Boolean(true),
                Constant::Nil
            ]
        );
        assert_eq!(chunk.main.locals[0].name, "n");
        assert_eq!(chunk.main.line_at(1), 2);
        assert_eq!(chunk.main.line_at(9), 0);
    }

    #[test]
    fn rejects_bad_instructions() {
        let err = Chunk::from_value(json!({"main": {"instructions": [[]]}})).unwrap_err();
        assert!(err.to_string().contains("empty instruction"));
        let err = Chunk::from_value(json!({"main": {"instructions": [[300, 0]]}})).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
