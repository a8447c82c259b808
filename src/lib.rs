//! Debug control engine for a Lua 5.1 style bytecode interpreter.
//!
//! The [`debugger::DebugEngine`] owns breakpoints, stepping, suspension
//! and error bookkeeping. Interpreters plug in through the traits in
//! [`interp`]; [`executor`] ships a small register VM that implements them.

pub mod config;
pub mod dap;
pub mod debugger;
pub mod error;
pub mod executor;
pub mod interp;
pub mod loader;

pub use config::EngineConfig;
pub use debugger::{DebugEngine, DebugEvent, EngineStatus, Execution};
pub use error::{DebuggerError, Result};
