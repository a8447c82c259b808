use std::path::Path;

use tracing::info;

use super::program::Chunk;
use super::vm::Vm;
use crate::debugger::{DebugEngine, Execution};
use crate::error::Result;
use crate::loader;

/// Load a compiled chunk from disk, register its source with the engine
/// and run its main function under the debugger.
pub fn launch(
    engine: &mut DebugEngine,
    vm: &mut Vm,
    program: &Path,
    stop_on_entry: bool,
) -> Result<Execution> {
    let chunk = Chunk::from_file(program)?;
    let file_id = program.to_string_lossy().replace('\\', "/");

    engine.handle_file_loaded(&file_id, chunk.source_path.as_deref(), loader::read_source);
    let main = vm.load(&chunk, &file_id);

    if stop_on_entry {
        engine.pause();
    }
    info!(program = %file_id, stop_on_entry, "launching");
    Ok(engine.execute(vm, main, Vec::new()))
}
