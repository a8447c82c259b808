use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::breakpoints::{BreakpointMap, Breakpoints};
use super::coordinator::{Coordinator, DeferredCall};
use super::errors::{ErrorCorrelator, ErrorRecord};
use super::events::{DebugEvent, EventChannel, StatePayload};
use super::scheduler::{Clock, Deferred, Scheduler, SystemClock};
use super::snapshot::SnapshotBuilder;
use super::stepping::{EngineStatus, SourceLocation, SteppingState};
use super::store::SessionStore;
use crate::config::EngineConfig;
use crate::error::{DebuggerError, Result};
use crate::interp::{ExecError, FrameId, Interpreter, RunOutcome, RuntimeError, StackEntry, Value};
use crate::loader::{resolve_source_url, LoadedSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub state: EngineStatus,
    pub data: StatePayload,
}

/// Everything a freshly attached client needs to render the debugger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentState {
    pub loaded: BTreeMap<String, LoadedSource>,
    pub breakpoints: BreakpointMap,
    pub stop_at_breakpoints: bool,
    pub error_log: Vec<ErrorRecord>,
    pub engine: EngineState,
}

/// Result of a host-initiated call.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Completed(Vec<Value>),
    Suspended,
    /// The engine was not running; the call will be replayed later.
    Queued,
    Failed(RuntimeError),
}

/// One debugging session. The interpreter is handed in by every operation
/// that can run code, and the engine hands itself back to the interpreter
/// as its execution hook.
pub struct DebugEngine {
    pub(super) config: EngineConfig,
    pub(super) breakpoints: Breakpoints,
    pub(super) stepping: SteppingState,
    pub(super) status: EngineStatus,
    pub(super) status_data: StatePayload,
    pub(super) coordinator: Coordinator,
    pub(super) errors: ErrorCorrelator,
    pub(super) events: EventChannel,
    pub(super) scheduler: Scheduler,
    pub(super) clock: Box<dyn Clock>,
    store: Option<Box<dyn SessionStore>>,
    loaded: BTreeMap<String, LoadedSource>,
    /// Line each frame last suspended on. An entry goes once that frame
    /// runs a different line or returns.
    pub(super) suspend_barriers: HashMap<FrameId, SourceLocation>,
    pub(super) last_executed: Option<SourceLocation>,
    pub(super) suspend_epoch: u64,
    pub(super) command_generation: u64,
}

impl DebugEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_store(config: EngineConfig, store: impl SessionStore + 'static) -> Self {
        Self::build(config, Some(Box::new(store)))
    }

    fn build(config: EngineConfig, store: Option<Box<dyn SessionStore>>) -> Self {
        let saved_breakpoints = store.as_ref().and_then(|s| {
            s.load_breakpoints().unwrap_or_else(|err| {
                warn!(%err, "could not read saved breakpoints");
                None
            })
        });
        let saved_stop = store.as_ref().and_then(|s| {
            s.load_stop_at_breakpoints().unwrap_or_else(|err| {
                warn!(%err, "could not read saved stop flag");
                None
            })
        });

        let breakpoints = Breakpoints::new(
            saved_breakpoints.unwrap_or_default(),
            saved_stop.unwrap_or(config.stop_at_breakpoints),
        );
        info!(
            files = breakpoints.map().len(),
            stop_at_breakpoints = breakpoints.stop_at_breakpoints(),
            "debug engine started"
        );

        Self {
            config,
            breakpoints,
            stepping: SteppingState::default(),
            status: EngineStatus::Running,
            status_data: StatePayload::default(),
            coordinator: Coordinator::default(),
            errors: ErrorCorrelator::default(),
            events: EventChannel::default(),
            scheduler: Scheduler::default(),
            clock: Box::new(SystemClock),
            store,
            loaded: BTreeMap::new(),
            suspend_barriers: HashMap::new(),
            last_executed: None,
            suspend_epoch: 0,
            command_generation: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Tear the session down. Subscribers see their channel close.
    pub fn shutdown(mut self) {
        let parked = self.coordinator.clear();
        info!(parked = parked.len(), errors = self.errors.log().len(), "debug engine stopped");
        self.events.close();
    }

    /// Listen for engine events. The receiver starts with the current
    /// breakpoint map and stop flag.
    pub fn subscribe(&mut self) -> Receiver<DebugEvent> {
        let initial = [
            DebugEvent::BreakpointsUpdated(self.breakpoints.map().clone()),
            DebugEvent::StopAtBreakpointsUpdated(self.breakpoints.stop_at_breakpoints()),
        ];
        self.events.subscribe(initial)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn breakpoints(&self) -> &BreakpointMap {
        self.breakpoints.map()
    }

    pub fn stop_at_breakpoints(&self) -> bool {
        self.breakpoints.stop_at_breakpoints()
    }

    pub fn stepping(&self) -> &SteppingState {
        &self.stepping
    }

    pub fn error_log(&self) -> &[ErrorRecord] {
        self.errors.log()
    }

    pub fn resume_depth(&self) -> usize {
        self.coordinator.len()
    }

    pub fn pending_calls(&self) -> usize {
        self.coordinator.pending_callbacks()
    }

    /// When the next deferred task is due, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.scheduler.next_due()
    }

    pub fn current_state(&self) -> CurrentState {
        CurrentState {
            loaded: self.loaded.clone(),
            breakpoints: self.breakpoints.map().clone(),
            stop_at_breakpoints: self.breakpoints.stop_at_breakpoints(),
            error_log: self.errors.log().to_vec(),
            engine: EngineState {
                state: self.status,
                data: self.status_data.clone(),
            },
        }
    }

    pub fn toggle_breakpoint(&mut self, file_id: &str, line: usize) -> Result<bool> {
        let is_set = self.breakpoints.toggle(file_id, line)?;
        self.persist_breakpoints();
        self.events.emit(DebugEvent::BreakpointUpdated {
            file_id: file_id.to_string(),
            line,
            is_set,
        });

        if is_set && !self.breakpoints.stop_at_breakpoints() {
            self.toggle_stop_at_breakpoints();
        }
        Ok(is_set)
    }

    pub fn toggle_stop_at_breakpoints(&mut self) -> bool {
        let stop = self.breakpoints.toggle_stop_at_breakpoints();
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.save_stop_at_breakpoints(stop) {
                warn!(%err, "could not save stop flag");
            }
        }
        self.events.emit(DebugEvent::StopAtBreakpointsUpdated(stop));
        stop
    }

    fn persist_breakpoints(&mut self) {
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.save_breakpoints(self.breakpoints.map()) {
                warn!(%err, "could not save breakpoints");
            }
        }
    }

    /// Stop at the next eligible instruction.
    pub fn pause(&mut self) {
        if self.status != EngineStatus::Running {
            debug!(status = ?self.status, "pause ignored");
            return;
        }
        self.begin_command();
        self.stepping.pause();
        info!("pause requested");
    }

    pub fn step_in(&mut self, vm: &mut dyn Interpreter) {
        self.begin_command();
        self.stepping.step_in();
        info!("step in");
        self.resume_thread(vm);
    }

    pub fn step_over(&mut self, vm: &mut dyn Interpreter) {
        self.begin_command();
        let innermost = self.coordinator.innermost();
        self.stepping.step_over(innermost);
        info!(target = ?innermost, "step over");
        self.resume_thread(vm);
    }

    pub fn step_out(&mut self, vm: &mut dyn Interpreter) {
        let Some(caller) = self.coordinator.enclosing_call() else {
            return self.resume(vm);
        };
        self.begin_command();
        self.stepping.step_out(caller);
        info!(target = ?caller, "step out");
        self.resume_thread(vm);
    }

    pub fn resume(&mut self, vm: &mut dyn Interpreter) {
        self.begin_command();
        self.stepping.resume();
        info!("resume");
        self.resume_thread(vm);
        self.events.emit(DebugEvent::Resumed);
    }

    /// Flip auto-stepping. Turning it on steps in straight away; each
    /// later suspend schedules the next step.
    pub fn auto_step(&mut self, vm: &mut dyn Interpreter) -> bool {
        self.begin_command();
        let enabled = self.stepping.toggle_auto_step();
        info!(enabled, "auto step");
        if enabled {
            self.step_in(vm);
        }
        enabled
    }

    /// Invalidates any auto-step timer scheduled before this command.
    fn begin_command(&mut self) {
        self.command_generation += 1;
    }

    /// Run every deferred task that is due.
    pub fn poll(&mut self, vm: &mut dyn Interpreter) {
        let now = self.clock.now();
        while let Some(task) = self.scheduler.pop_due(now) {
            self.run_task(vm, task);
        }
    }

    fn run_task(&mut self, vm: &mut dyn Interpreter, task: Deferred) {
        match task {
            Deferred::EnterSuspended { epoch, location } => {
                if epoch == self.suspend_epoch && self.status == EngineStatus::Suspending {
                    self.enter_suspended(&*vm, location);
                } else {
                    debug!(epoch, current = self.suspend_epoch, "stale suspend dropped");
                }
            }
            Deferred::AutoStep { generation } => {
                if self.stepping.is_auto_stepping()
                    && generation == self.command_generation
                    && self.status == EngineStatus::Suspended
                {
                    debug!("auto step firing");
                    self.step_in(vm);
                }
            }
        }
    }

    fn enter_suspended(&mut self, vm: &dyn Interpreter, location: SourceLocation) {
        let snapshot = SnapshotBuilder::new(&self.config).build(vm, self.coordinator.frames());
        info!(
            url = %location.url,
            line = location.line,
            depth = self.coordinator.len(),
            "suspended"
        );
        self.transition_with(
            EngineStatus::Suspended,
            StatePayload {
                location: Some(location),
                snapshot: Some(snapshot),
            },
        );

        if self.stepping.is_auto_stepping() {
            let due = self.clock.now() + self.config.auto_step_delay();
            self.scheduler.schedule(
                Deferred::AutoStep {
                    generation: self.command_generation,
                },
                due,
            );
        }
    }

    pub(super) fn transition(&mut self, next: EngineStatus) {
        self.transition_with(next, StatePayload::default());
    }

    pub(super) fn transition_with(&mut self, next: EngineStatus, payload: StatePayload) {
        if let Err(err) = self.set_status(next, payload) {
            warn!(%err, "status change rejected");
        }
    }

    fn set_status(&mut self, next: EngineStatus, payload: StatePayload) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DebuggerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        debug!(from = ?self.status, to = ?next, "status");
        self.status = next;
        self.status_data = payload.clone();
        self.events.emit(DebugEvent::StateUpdated {
            status: next,
            payload,
        });
        Ok(())
    }

    /// Host entry point for calling into the interpreter. Calls made while
    /// the engine is paused are queued and replayed in order once it runs
    /// again.
    pub fn execute(
        &mut self,
        vm: &mut dyn Interpreter,
        function: Value,
        args: Vec<Value>,
    ) -> Execution {
        if self.status != EngineStatus::Running {
            debug!(status = ?self.status, "engine busy, call deferred");
            self.coordinator.enqueue(DeferredCall { function, args });
            return Execution::Queued;
        }

        match vm.call(&function, args, self) {
            Ok(RunOutcome::Completed(values)) => Execution::Completed(values),
            Ok(RunOutcome::Suspended) => Execution::Suspended,
            Err(err) => Execution::Failed(self.fail(err, None)),
        }
    }

    /// Normalise, annotate and report an error that escaped execution.
    pub(super) fn fail(&mut self, err: ExecError, origin: Option<StackEntry>) -> RuntimeError {
        let position = self.last_executed.as_ref();
        let mut err = match err {
            ExecError::Runtime(err) => self.errors.adopt(err, position),
            ExecError::Host(err) => self.errors.wrap_host(err, position),
        };
        // Frames that raised already carry their own entries.
        if err.stack.is_empty() {
            if let Some(entry) = origin {
                ErrorCorrelator::tag(&mut err, entry);
            }
        }
        self.forget_unwound_frames();
        self.report_uncaught(&err);
        err
    }

    /// Every frame of a failed run is gone; a step target or barrier
    /// pointing at one can never match again.
    pub(super) fn forget_unwound_frames(&mut self) {
        if let Some(target) = self.stepping.drop_target() {
            debug!(?target, "step target unwound, stepping in");
        }
        self.suspend_barriers.clear();
    }

    /// Typed uncaught-error channel. Reporting the same error again is a
    /// no-op.
    pub fn report_uncaught(&mut self, err: &RuntimeError) -> Option<ErrorRecord> {
        let index = match err.index {
            Some(index) => index,
            None => self
                .errors
                .adopt(err.clone(), self.last_executed.as_ref())
                .index?,
        };
        let record = self.errors.correlate(index)?;
        self.log_and_emit(record)
    }

    /// Text-only uncaught-error channel; recovers the index from the tag in
    /// the rendered message.
    pub fn report_uncaught_message(&mut self, message: &str) -> Option<ErrorRecord> {
        let record = self.errors.correlate_message(message)?;
        self.log_and_emit(record)
    }

    fn log_and_emit(&mut self, record: ErrorRecord) -> Option<ErrorRecord> {
        error!(
            index = %record.index,
            file_id = ?record.file_id,
            line = ?record.line_number,
            message = %record.message,
            "uncaught error"
        );
        self.events.emit(DebugEvent::Error(record.clone()));
        Some(record)
    }

    /// Record a compiled chunk and fetch its source. Returns whether the
    /// source could be read.
    pub fn handle_file_loaded<F>(&mut self, json_url: &str, source_path: Option<&str>, fetch: F) -> bool
    where
        F: FnOnce(&str) -> io::Result<String>,
    {
        let url = resolve_source_url(json_url, source_path);
        self.breakpoints.ensure_file(json_url);

        match fetch(&url) {
            Ok(source) => {
                info!(json_url, url = %url, bytes = source.len(), "source loaded");
                self.loaded.insert(
                    json_url.to_string(),
                    LoadedSource {
                        filename: url.clone(),
                        source: Some(source.clone()),
                    },
                );
                self.events.emit(DebugEvent::LuaLoaded {
                    json_url: json_url.to_string(),
                    url,
                    source,
                });
                true
            }
            Err(err) => {
                warn!(json_url, url = %url, %err, "source unavailable");
                self.loaded.insert(
                    json_url.to_string(),
                    LoadedSource {
                        filename: url.clone(),
                        source: None,
                    },
                );
                self.events.emit(DebugEvent::LuaLoadFailed {
                    json_url: json_url.to_string(),
                    url,
                    message: err.to_string(),
                });
                false
            }
        }
    }
}
