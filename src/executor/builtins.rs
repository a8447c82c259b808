//! Globals every program starts with.

use super::vm::Vm;
use crate::interp::{ExecError, RuntimeError, Value};

pub(super) fn install(vm: &mut Vm) {
    vm.register_host("print", print);
    vm.register_host("tostring", tostring);
    vm.register_host("error", error);
    vm.register_host("assert", assert);
}

fn print(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, ExecError> {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\t");
    vm.print(line);
    Ok(Vec::new())
}

fn tostring(_vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, ExecError> {
    let value = args.into_iter().next().unwrap_or_default();
    Ok(vec![Value::String(value.to_string())])
}

fn error(_vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, ExecError> {
    let message = args.into_iter().next().unwrap_or_default();
    Err(RuntimeError::new(message.coerce_string()).into())
}

fn assert(_vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, ExecError> {
    match args.first() {
        Some(value) if value.is_truthy() => Ok(args),
        _ => {
            let message = args
                .get(1)
                .map(Value::coerce_string)
                .unwrap_or_else(|| "assertion failed!".to_string());
            Err(RuntimeError::new(message).into())
        }
    }
}
