use std::collections::VecDeque;

use tracing::{debug, warn};

use super::engine::DebugEngine;
use super::stepping::EngineStatus;
use crate::interp::{Interpreter, Resumable, RunOutcome, StackEntry, Value};

/// A host call that arrived while the engine was paused.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredCall {
    pub function: Value,
    pub args: Vec<Value>,
}

/// Suspended frames (index 0 is innermost) and the calls waiting for the
/// engine to run again.
#[derive(Debug, Default)]
pub struct Coordinator {
    resume_stack: Vec<Resumable>,
    callbacks: VecDeque<DeferredCall>,
}

impl Coordinator {
    pub fn park(&mut self, frame: Resumable) {
        self.resume_stack.push(frame);
    }

    /// Outermost first.
    pub fn pop(&mut self) -> Option<Resumable> {
        self.resume_stack.pop()
    }

    pub fn innermost(&self) -> Option<Resumable> {
        self.resume_stack.first().copied()
    }

    /// Nearest call frame enclosing the innermost one. Coroutine entries in
    /// between are skipped.
    pub fn enclosing_call(&self) -> Option<Resumable> {
        self.resume_stack
            .iter()
            .skip(1)
            .copied()
            .find(|entry| matches!(entry, Resumable::Call(_)))
    }

    pub fn frames(&self) -> &[Resumable] {
        &self.resume_stack
    }

    pub fn len(&self) -> usize {
        self.resume_stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resume_stack.is_empty()
    }

    pub fn clear(&mut self) -> Vec<Resumable> {
        std::mem::take(&mut self.resume_stack)
    }

    pub fn enqueue(&mut self, call: DeferredCall) {
        self.callbacks.push_back(call);
    }

    pub fn next_callback(&mut self) -> Option<DeferredCall> {
        self.callbacks.pop_front()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }
}

impl DebugEngine {
    /// Pop the outermost suspended frame and re-enter it; the interpreter
    /// pulls the inner frames back through the hook. Deferred host calls
    /// run afterwards, provided execution did not stop again.
    pub(super) fn resume_thread(&mut self, vm: &mut dyn Interpreter) {
        self.transition(EngineStatus::Resuming);

        match self.coordinator.pop() {
            Some(top) => {
                if self.coordinator.is_empty() {
                    self.transition(EngineStatus::Running);
                }

                // Used only if the failure carries no frames of its own.
                let origin = top.frame().and_then(|id| {
                    vm.frame(id).map(|f| StackEntry { frame: id, pc: f.pc() })
                });
                debug!(?top, inner = self.coordinator.len(), "re-entering");

                let result = match top {
                    Resumable::Call(frame) => vm.run_frame(frame, self),
                    Resumable::Coroutine(coroutine) => vm.resume_coroutine(coroutine, self),
                };

                match result {
                    Ok(RunOutcome::Suspended) => debug!("stopped again while resuming"),
                    Ok(RunOutcome::Completed(_)) => {
                        if self.status == EngineStatus::Resuming {
                            warn!(
                                left = self.coordinator.len(),
                                "interpreter finished without taking every frame"
                            );
                            self.abandon_suspension();
                        }
                    }
                    Err(err) => {
                        self.fail(err, origin);
                        self.abandon_suspension();
                    }
                }
            }
            None => self.transition(EngineStatus::Running),
        }

        self.drain_callbacks(vm);
    }

    /// Drop whatever is still parked and go back to running.
    fn abandon_suspension(&mut self) {
        let dropped = self.coordinator.clear();
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "dropping parked frames");
            self.forget_unwound_frames();
        }
        if self.status != EngineStatus::Running {
            self.transition(EngineStatus::Running);
        }
    }

    fn drain_callbacks(&mut self, vm: &mut dyn Interpreter) {
        while self.status == EngineStatus::Running {
            let Some(call) = self.coordinator.next_callback() else {
                break;
            };
            debug!(remaining = self.coordinator.pending_callbacks(), "replaying deferred call");
            if let Err(err) = vm.call(&call.function, call.args, self) {
                self.fail(err, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{CoroutineId, FrameId};

    #[test]
    fn resume_stack_is_innermost_first() {
        let mut coordinator = Coordinator::default();
        coordinator.park(Resumable::Call(FrameId(3)));
        coordinator.park(Resumable::Call(FrameId(2)));
        coordinator.park(Resumable::Coroutine(CoroutineId(1)));

        assert_eq!(coordinator.innermost(), Some(Resumable::Call(FrameId(3))));
        assert_eq!(coordinator.enclosing_call(), Some(Resumable::Call(FrameId(2))));
        assert_eq!(coordinator.pop(), Some(Resumable::Coroutine(CoroutineId(1))));
        assert_eq!(coordinator.len(), 2);
    }

    #[test]
    fn enclosing_call_skips_coroutines() {
        let mut coordinator = Coordinator::default();
        coordinator.park(Resumable::Call(FrameId(5)));
        coordinator.park(Resumable::Coroutine(CoroutineId(2)));
        assert_eq!(coordinator.enclosing_call(), None);

        coordinator.park(Resumable::Call(FrameId(1)));
        assert_eq!(coordinator.enclosing_call(), Some(Resumable::Call(FrameId(1))));
    }

    #[test]
    fn callbacks_replay_in_arrival_order() {
        let mut coordinator = Coordinator::default();
        for n in 0..3 {
            coordinator.enqueue(DeferredCall {
                function: Value::Nil,
                args: vec![Value::Number(n as f64)],
            });
        }
        let order: Vec<_> = std::iter::from_fn(|| coordinator.next_callback())
            .map(|call| call.args[0].clone())
            .collect();
        assert_eq!(
            order,
            vec![Value::Number(0.0), Value::Number(1.0), Value::Number(2.0)]
        );
    }
}
