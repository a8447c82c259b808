use std::sync::mpsc::{channel, Receiver, Sender};

use serde::Serialize;
use tracing::debug;

use super::breakpoints::BreakpointMap;
use super::errors::ErrorRecord;
use super::snapshot::Snapshot;
use super::stepping::{EngineStatus, SourceLocation};

/// Status-specific data attached to `state-updated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatePayload {
    #[serde(flatten)]
    pub location: Option<SourceLocation>,
    #[serde(flatten)]
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "body", rename_all = "kebab-case")]
pub enum DebugEvent {
    BreakpointsUpdated(BreakpointMap),
    #[serde(rename_all = "camelCase")]
    BreakpointUpdated {
        file_id: String,
        line: usize,
        is_set: bool,
    },
    StopAtBreakpointsUpdated(bool),
    StateUpdated {
        status: EngineStatus,
        payload: StatePayload,
    },
    Resumed,
    Error(ErrorRecord),
    #[serde(rename_all = "camelCase")]
    LuaLoaded {
        json_url: String,
        url: String,
        source: String,
    },
    #[serde(rename_all = "camelCase")]
    LuaLoadFailed {
        json_url: String,
        url: String,
        message: String,
    },
}

impl DebugEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DebugEvent::BreakpointsUpdated(_) => "breakpoints-updated",
            DebugEvent::BreakpointUpdated { .. } => "breakpoint-updated",
            DebugEvent::StopAtBreakpointsUpdated(_) => "stop-at-breakpoints-updated",
            DebugEvent::StateUpdated { .. } => "state-updated",
            DebugEvent::Resumed => "resumed",
            DebugEvent::Error(_) => "error",
            DebugEvent::LuaLoaded { .. } => "lua-loaded",
            DebugEvent::LuaLoadFailed { .. } => "lua-load-failed",
        }
    }
}

/// Fan-out to every live subscriber. Dropped receivers are pruned on the
/// next emit.
#[derive(Default)]
pub struct EventChannel {
    subscribers: Vec<Sender<DebugEvent>>,
}

impl EventChannel {
    /// New receiver, primed with `initial` so it starts in sync.
    pub fn subscribe(
        &mut self,
        initial: impl IntoIterator<Item = DebugEvent>,
    ) -> Receiver<DebugEvent> {
        let (tx, rx) = channel();
        for event in initial {
            let _ = tx.send(event);
        }
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: DebugEvent) {
        debug!(event = event.name(), subscribers = self.subscribers.len(), "emit");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn close(&mut self) {
        self.subscribers.clear();
    }
}
