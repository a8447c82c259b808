//! Reference interpreter the debugger drives: compiled chunk loading and a
//! small register VM.

mod builtins;
mod program;
mod runner;
mod vm;

pub use program::{Chunk, Constant, Instruction, ProgramError, Proto, RK_CONSTANT};
pub use runner::launch;
pub use vm::{HostFn, Vm};
