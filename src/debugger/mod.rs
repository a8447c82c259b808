mod breakpoints;
mod coordinator;
mod engine;
mod errors;
mod events;
mod interceptor;
mod scheduler;
mod snapshot;
mod stepping;
mod store;

pub use breakpoints::BreakpointMap;
pub use coordinator::DeferredCall;
pub use engine::{CurrentState, DebugEngine, EngineState, Execution};
pub use errors::ErrorRecord;
pub use events::{DebugEvent, StatePayload};
pub use scheduler::{Clock, ManualClock, SystemClock};
pub use snapshot::{FieldValue, FormattedValue, Snapshot, SnapshotBuilder};
pub use stepping::{EngineStatus, SourceLocation, SteppingState};
pub use store::{FileStore, MemoryStore, SessionStore, StoredSession};
