mod paths;
mod types;

pub use paths::resolve_source_url;
pub use types::LoadedSource;

use std::io;

/// Fetch source text from the local filesystem.
pub fn read_source(url: &str) -> io::Result<String> {
    std::fs::read_to_string(url)
}
