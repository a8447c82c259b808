//! The per-instruction gate the interpreter consults.

use tracing::{debug, info};

use super::engine::DebugEngine;
use super::errors::ErrorCorrelator;
use super::events::StatePayload;
use super::scheduler::Deferred;
use super::stepping::{EngineStatus, SourceLocation};
use crate::interp::{
    opcode, Decision, ExecutionHook, FrameId, InstructionSite, Resumable, RuntimeError,
    StackEntry,
};

impl DebugEngine {
    fn should_suspend(
        &self,
        frame: FrameId,
        file_id: &str,
        line: usize,
        opcode: u8,
        coroutine_resuming: bool,
    ) -> bool {
        let wanted =
            self.stepping.breaks_in(frame) || self.breakpoints.should_stop_at(file_id, line);

        wanted
            && self.status == EngineStatus::Running
            && self.coordinator.is_empty()
            && !self
                .suspend_barriers
                .get(&frame)
                .is_some_and(|at| at.line == line && at.url == file_id)
            && !self.config.excluded_opcodes.contains(&opcode)
            && !coroutine_resuming
    }

    /// Park the breaking frame and start the suspend. Listeners hear about
    /// `suspended` only when the deferred task runs.
    fn suspend_at(&mut self, frame: FrameId, location: SourceLocation) {
        self.coordinator.park(Resumable::Call(frame));
        self.suspend_barriers.insert(frame, location.clone());
        self.suspend_epoch += 1;

        info!(url = %location.url, line = location.line, frame = frame.0, "suspending");
        self.transition_with(
            EngineStatus::Suspending,
            StatePayload {
                location: Some(location.clone()),
                snapshot: None,
            },
        );

        let due = self.clock.now();
        self.scheduler.schedule(
            Deferred::EnterSuspended {
                epoch: self.suspend_epoch,
                location,
            },
            due,
        );
    }
}

impl ExecutionHook for DebugEngine {
    fn before_instruction(&mut self, site: InstructionSite<'_>) -> Decision {
        let InstructionSite {
            frame,
            line,
            opcode,
            coroutine_resuming,
            ..
        } = site;
        let frame_id = frame.id();

        if self.should_suspend(frame_id, frame.file_id(), line, opcode, coroutine_resuming) {
            let location = SourceLocation {
                url: frame.file_id().to_string(),
                line,
            };
            // Re-run the breaking instruction on resume.
            frame.set_pc(frame.pc().saturating_sub(1));
            self.suspend_at(frame_id, location);
            return Decision::Suspend;
        }

        let file_id = frame.file_id();
        if self
            .suspend_barriers
            .get(&frame_id)
            .is_some_and(|at| at.line != line || at.url != file_id)
        {
            self.suspend_barriers.remove(&frame_id);
        }
        self.last_executed = Some(SourceLocation {
            url: file_id.to_string(),
            line,
        });
        Decision::Proceed
    }

    fn after_instruction(
        &mut self,
        frame: FrameId,
        pc: usize,
        opcode: u8,
        result: Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        match result {
            Ok(()) => {
                if opcode == opcode::RETURN {
                    self.suspend_barriers.remove(&frame);
                }
                if self.config.step_clearing_opcodes.contains(&opcode)
                    && self.stepping.clear_target_if(frame)
                {
                    debug!(frame = frame.0, "step target left, stepping in");
                }
                Ok(())
            }
            Err(mut err) => {
                ErrorCorrelator::tag(&mut err, StackEntry { frame, pc });
                Err(err)
            }
        }
    }

    fn park(&mut self, frame: Resumable) {
        self.coordinator.park(frame);
    }

    fn take_resume(&mut self) -> Option<Resumable> {
        if self.status != EngineStatus::Resuming {
            return None;
        }
        let next = self.coordinator.pop();
        if next.is_some() && self.coordinator.is_empty() {
            self.transition(EngineStatus::Running);
        }
        next
    }

    fn is_resuming(&self) -> bool {
        self.status == EngineStatus::Resuming
    }

    fn runtime_error(&mut self, message: String) -> RuntimeError {
        self.errors.create(message, self.last_executed.as_ref())
    }
}
