use serde::Serialize;

/// Source text fetched for a compiled chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedSource {
    /// Resolved source URL.
    pub filename: String,
    /// `None` when the fetch failed.
    pub source: Option<String>,
}
