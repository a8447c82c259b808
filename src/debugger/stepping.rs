use serde::{Deserialize, Serialize};

use crate::interp::{FrameId, Resumable};

/// Engine lifecycle. The normal cycle is
/// `running -> suspending -> suspended -> resuming -> running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Running,
    Suspending,
    Suspended,
    Resuming,
}

impl EngineStatus {
    pub fn can_transition_to(self, next: EngineStatus) -> bool {
        use EngineStatus::*;
        matches!(
            (self, next),
            (Running, Suspending)
                | (Running, Resuming)
                | (Suspending, Suspended)
                | (Suspending, Resuming)
                | (Suspending, Running)
                | (Suspended, Resuming)
                | (Resuming, Running)
        )
    }
}

/// A file/line pair as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub url: String,
    pub line: usize,
}

/// Stepping mode and target, driven by client commands.
#[derive(Debug, Default)]
pub struct SteppingState {
    stepping: bool,
    step_target: Option<Resumable>,
    auto_step: bool,
}

impl SteppingState {
    pub fn is_stepping(&self) -> bool {
        self.stepping
    }

    pub fn step_target(&self) -> Option<Resumable> {
        self.step_target
    }

    pub fn is_auto_stepping(&self) -> bool {
        self.auto_step
    }

    /// Stepping wants to stop in `frame`: either no target is set, or the
    /// target is this very frame.
    pub fn breaks_in(&self, frame: FrameId) -> bool {
        self.stepping
            && self
                .step_target
                .map_or(true, |target| target == Resumable::Call(frame))
    }

    pub fn pause(&mut self) {
        self.stepping = true;
    }

    pub fn step_in(&mut self) {
        self.stepping = true;
        self.step_target = None;
    }

    pub fn step_over(&mut self, innermost: Option<Resumable>) {
        self.stepping = true;
        self.auto_step = false;
        self.step_target = innermost;
    }

    pub fn step_out(&mut self, caller: Resumable) {
        self.stepping = true;
        self.auto_step = false;
        self.step_target = Some(caller);
    }

    pub fn resume(&mut self) {
        self.stepping = false;
        self.auto_step = false;
        self.step_target = None;
    }

    pub fn toggle_auto_step(&mut self) -> bool {
        self.auto_step = !self.auto_step;
        self.auto_step
    }

    /// The target frame died without returning; stepping degrades to
    /// step-in.
    pub fn drop_target(&mut self) -> Option<Resumable> {
        self.step_target.take()
    }

    /// The target frame finished, so stepping degrades to step-in.
    pub fn clear_target_if(&mut self, frame: FrameId) -> bool {
        if self.step_target == Some(Resumable::Call(frame)) {
            self.step_target = None;
            true
        } else {
            false
        }
    }
}
