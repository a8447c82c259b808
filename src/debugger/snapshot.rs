//! Readable views of interpreter state at a suspend point.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::interp::{FrameView, Interpreter, Resumable, StackEntry, Value};

/// Width of the indent the stack renderer puts before each entry.
const STACK_INDENT: &str = "    ";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormattedValue {
    Number(f64),
    Table {
        caption: String,
        fields: BTreeMap<String, FieldValue>,
    },
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub globals: BTreeMap<String, FormattedValue>,
    pub locals: BTreeMap<String, FormattedValue>,
    pub upvalues: BTreeMap<String, FormattedValue>,
    pub call_stack: Vec<String>,
}

pub struct SnapshotBuilder<'a> {
    config: &'a EngineConfig,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// `resume_stack` is innermost first.
    pub fn build(&self, vm: &dyn Interpreter, resume_stack: &[Resumable]) -> Snapshot {
        let innermost = resume_stack
            .iter()
            .find_map(|r| r.frame())
            .and_then(|id| vm.frame(id));

        Snapshot {
            globals: self.globals(vm),
            locals: innermost.map(|f| self.locals(f)).unwrap_or_default(),
            upvalues: innermost.map(|f| self.upvalues(f)).unwrap_or_default(),
            call_stack: self.call_stack(vm, resume_stack),
        }
    }

    pub fn format_value(&self, value: &Value) -> FormattedValue {
        match value {
            Value::Number(n) => FormattedValue::Number(*n),
            Value::Table(table) => {
                let fields = table
                    .fields()
                    .into_iter()
                    .filter(|(name, _)| *name != self.config.bookkeeping_key)
                    .map(|(name, field)| {
                        let field = match field {
                            Value::Number(n) => FieldValue::Number(n),
                            other => FieldValue::Text(other.coerce_string()),
                        };
                        (name, field)
                    })
                    .collect();
                FormattedValue::Table {
                    caption: value.coerce_string(),
                    fields,
                }
            }
            other => FormattedValue::Text(other.coerce_string()),
        }
    }

    pub fn globals(&self, vm: &dyn Interpreter) -> BTreeMap<String, FormattedValue> {
        vm.globals()
            .into_iter()
            .filter(|(name, _)| !self.config.is_hidden_global(name))
            .map(|(name, value)| (name, self.format_value(&value)))
            .collect()
    }

    /// Live locals only. A local occupies the next register slot among the
    /// locals live at this pc.
    pub fn locals(&self, frame: &dyn FrameView) -> BTreeMap<String, FormattedValue> {
        let pc = frame.pc() + 1;
        let mut slot = 0;
        let mut result = BTreeMap::new();

        for local in frame.locals() {
            if local.start_pc < pc && local.end_pc >= pc {
                let value = frame.register(slot);
                slot += 1;
                result.insert(local.name.clone(), self.format_value(&value));
            }
        }
        result
    }

    pub fn upvalues(&self, frame: &dyn FrameView) -> BTreeMap<String, FormattedValue> {
        frame
            .upvalues()
            .into_iter()
            .map(|(name, value)| (name, self.format_value(&value)))
            .collect()
    }

    /// The innermost frame is shown at its own pc; every caller is paused
    /// inside a call, so it is shown one instruction back.
    pub fn call_stack(&self, vm: &dyn Interpreter, resume_stack: &[Resumable]) -> Vec<String> {
        let mut entries = Vec::new();
        for id in resume_stack.iter().filter_map(|r| r.frame()) {
            let Some(frame) = vm.frame(id) else { continue };
            let pc = if entries.is_empty() {
                frame.pc()
            } else {
                frame.pc().saturating_sub(1)
            };
            entries.push(StackEntry { frame: id, pc });
        }

        if entries.is_empty() {
            return Vec::new();
        }

        vm.render_stack(&entries)
            .lines()
            .map(|line| line.strip_prefix(STACK_INDENT).unwrap_or(line).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::TableRef;
    use serde_json::json;

    #[test]
    fn tables_render_caption_and_visible_fields() {
        let config = EngineConfig::default();
        let builder = SnapshotBuilder::new(&config);

        let table = TableRef::new();
        table.set("hp".into(), Value::Number(10.0));
        table.set("name".into(), Value::from("orc"));
        table.set("alive".into(), Value::Boolean(true));
        table.set("__vm".into(), Value::from("internal"));

        let formatted = builder.format_value(&Value::Table(table.clone()));
        let caption = Value::Table(table).coerce_string();
        assert_eq!(
            serde_json::to_value(formatted).unwrap(),
            json!({
                "caption": caption,
                "fields": {"alive": "true", "hp": 10.0, "name": "orc"}
            })
        );
    }

    #[test]
    fn scalars_pass_through_or_stringify() {
        let config = EngineConfig::default();
        let builder = SnapshotBuilder::new(&config);
        assert_eq!(builder.format_value(&Value::Number(1.5)), FormattedValue::Number(1.5));
        assert_eq!(
            builder.format_value(&Value::Nil),
            FormattedValue::Text("nil".into())
        );
        assert_eq!(
            builder.format_value(&Value::Number(2.0)),
            FormattedValue::Number(2.0)
        );
    }
}
