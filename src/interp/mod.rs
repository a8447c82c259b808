//! The boundary between the debug engine and the bytecode interpreter.
//!
//! The interpreter owns frames, registers and the instruction loop. It
//! accepts an [`ExecutionHook`] at its execution entry points and consults
//! it around every instruction; the engine never reaches into the
//! interpreter beyond the capabilities listed here.

mod error;
mod value;

pub use error::{ErrorIndex, ExecError, HostError, RuntimeError, ERROR_TAG_PREFIX};
pub use value::{format_number, FunctionId, TableRef, Value};

use serde::Serialize;

/// Lua 5.1 opcode numbers the engine cares about.
pub mod opcode {
    pub const RETURN: u8 = 30;
    pub const CLOSE: u8 = 35;
    pub const CLOSURE: u8 = 36;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FrameId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CoroutineId(pub u64);

/// Something parked on the resume stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resumable {
    Call(FrameId),
    Coroutine(CoroutineId),
}

impl Resumable {
    pub fn frame(self) -> Option<FrameId> {
        match self {
            Resumable::Call(id) => Some(id),
            Resumable::Coroutine(_) => None,
        }
    }
}

/// A frame paired with its effective program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEntry {
    pub frame: FrameId,
    pub pc: usize,
}

/// Debug info for one declared local variable.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, Serialize)]
pub struct LocalVar {
    #[serde(rename = "varname")]
    pub name: String,
    #[serde(rename = "startpc")]
    pub start_pc: usize,
    #[serde(rename = "endpc")]
    pub end_pc: usize,
}

/// Read access to an interpreter call frame, plus the one mutation the
/// engine needs (program counter rollback).
pub trait FrameView {
    fn id(&self) -> FrameId;
    /// Index of the next instruction to execute.
    fn pc(&self) -> usize;
    fn set_pc(&mut self, pc: usize);
    fn file_id(&self) -> &str;
    /// Declared locals, in declaration order.
    fn locals(&self) -> &[LocalVar];
    fn register(&self, slot: usize) -> Value;
    fn upvalues(&self) -> Vec<(String, Value)>;
}

/// The instruction about to run, as presented to the hook.
pub struct InstructionSite<'a> {
    pub frame: &'a mut dyn FrameView,
    pub pc: usize,
    pub line: usize,
    pub opcode: u8,
    /// A coroutine is in the middle of its resume operation.
    pub coroutine_resuming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Suspend,
}

/// Callbacks the interpreter makes into whoever is observing execution.
pub trait ExecutionHook {
    /// Consulted before each instruction. On [`Decision::Suspend`] the hook
    /// has already parked `site.frame` and rolled its pc back; the
    /// interpreter must park every caller (innermost first) and return
    /// [`RunOutcome::Suspended`] without running the instruction.
    fn before_instruction(&mut self, site: InstructionSite<'_>) -> Decision;

    /// Called once the instruction has run.
    fn after_instruction(
        &mut self,
        frame: FrameId,
        pc: usize,
        _opcode: u8,
        result: Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        result.map_err(|mut err| {
            err.stack.push(StackEntry { frame, pc });
            err
        })
    }

    fn park(&mut self, frame: Resumable);

    /// Next inner frame to rebuild while re-entering a suspended chain.
    fn take_resume(&mut self) -> Option<Resumable>;

    fn is_resuming(&self) -> bool;

    /// Every runtime error is constructed through here.
    fn runtime_error(&mut self, message: String) -> RuntimeError {
        RuntimeError::new(message)
    }
}

/// Hook used when no debugger is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl ExecutionHook for Detached {
    fn before_instruction(&mut self, _site: InstructionSite<'_>) -> Decision {
        Decision::Proceed
    }

    fn park(&mut self, _frame: Resumable) {}

    fn take_resume(&mut self) -> Option<Resumable> {
        None
    }

    fn is_resuming(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Vec<Value>),
    Suspended,
}

/// What the engine consumes from the interpreter.
pub trait Interpreter {
    fn frame(&self, id: FrameId) -> Option<&dyn FrameView>;

    /// Entries of the global namespace.
    fn globals(&self) -> Vec<(String, Value)>;

    /// One line per entry, each indented by four spaces.
    fn render_stack(&self, stack: &[StackEntry]) -> String;

    /// Re-enter a suspended call frame.
    fn run_frame(
        &mut self,
        frame: FrameId,
        hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError>;

    fn resume_coroutine(
        &mut self,
        coroutine: CoroutineId,
        hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError>;

    /// Host-initiated call into a function value.
    fn call(
        &mut self,
        function: &Value,
        args: Vec<Value>,
        hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError>;
}
