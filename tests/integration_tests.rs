// tests/integration_tests.rs
// Drives the debug engine against the reference VM with hand-built chunks

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use lua_debugger::debugger::{
    DebugEngine, DebugEvent, EngineStatus, Execution, MemoryStore, StoredSession,
};
use lua_debugger::executor::{Chunk, Vm};
use lua_debugger::interp::{FrameId, HostError, StackEntry, Value};
use lua_debugger::{DebuggerError, EngineConfig};
use serde_json::json;

const FILE: &str = "a.lua.json";

// Helper to build a chunk from its JSON form
fn load(vm: &mut Vm, main: serde_json::Value) -> Value {
    let chunk = Chunk::from_value(json!({ "sourceName": "@a.lua", "main": main }))
        .expect("test chunk should parse");
    vm.load(&chunk, FILE)
}

// x = 1 / y = x + 1 / return
fn straight_line(vm: &mut Vm) -> Value {
    load(
        vm,
        json!({
            "name": "main",
            "instructions": [[1, 0, 0], [7, 0, 1], [5, 0, 1], [12, 0, 0, 256], [7, 0, 2], [30, 0, 1]],
            "constants": [1, "x", "y"],
            "linePositions": [1, 1, 2, 2, 2, 3]
        }),
    )
}

// function f() a = 1 end / f() / z = 3 / return
fn with_call(vm: &mut Vm) -> Value {
    load(
        vm,
        json!({
            "name": "main",
            "instructions": [
                [36, 0, 0], [7, 0, 0],
                [5, 0, 0], [28, 0, 1, 1],
                [1, 0, 1], [7, 0, 2],
                [30, 0, 1]
            ],
            "constants": ["f", 3, "z"],
            "linePositions": [1, 1, 2, 2, 3, 3, 4],
            "protos": [{
                "name": "f",
                "instructions": [[1, 0, 0], [7, 0, 1], [30, 0, 1]],
                "constants": [1, "a"],
                "linePositions": [10, 10, 11]
            }]
        }),
    )
}

// function f() return g() end / function g() return 7 end
// r = f() / z = 3 / return
fn nested_call(vm: &mut Vm) -> Value {
    load(
        vm,
        json!({
            "name": "main",
            "instructions": [
                [36, 0, 0], [7, 0, 0], [36, 0, 1], [7, 0, 1],
                [5, 0, 0], [28, 0, 1, 2], [7, 0, 2],
                [1, 0, 3], [7, 0, 4],
                [30, 0, 1]
            ],
            "constants": ["f", "g", "r", 3, "z"],
            "linePositions": [1, 1, 1, 1, 2, 2, 2, 3, 3, 4],
            "protos": [
                {
                    "name": "f",
                    "instructions": [[5, 0, 0], [28, 0, 1, 2], [30, 0, 2]],
                    "constants": ["g"],
                    "linePositions": [10, 10, 11]
                },
                {
                    "name": "g",
                    "instructions": [[1, 0, 0], [30, 0, 2]],
                    "constants": [7],
                    "linePositions": [20, 21]
                }
            ]
        }),
    )
}

// i = 0 / repeat i = i + 1 / until not (i < 2) / i global
fn looping(vm: &mut Vm) -> Value {
    load(
        vm,
        json!({
            "name": "main",
            "instructions": [[1, 0, 0], [12, 0, 0, 257], [24, 1, 0, 258], [22, 0, -3], [7, 0, 3], [30, 0, 1]],
            "constants": [0, 1, 2, "i"],
            "linePositions": [1, 2, 3, 3, 4, 4]
        }),
    )
}

fn engine_with(breakpoints: serde_json::Value) -> DebugEngine {
    let map: BTreeMap<String, Vec<bool>> =
        serde_json::from_value(breakpoints).expect("breakpoint map");
    let store = MemoryStore::new(StoredSession {
        breakpoints: Some(map),
        stop_at_breakpoints: None,
    });
    DebugEngine::with_store(EngineConfig::default(), store)
}

fn drain(events: &Receiver<DebugEvent>) -> Vec<DebugEvent> {
    events.try_iter().collect()
}

fn statuses(events: &[DebugEvent]) -> Vec<EngineStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            DebugEvent::StateUpdated { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

fn suspended_line(engine: &DebugEngine) -> Option<usize> {
    let state = engine.current_state();
    match state.engine.state {
        EngineStatus::Suspended => state.engine.data.location.map(|l| l.line),
        _ => None,
    }
}

// A suspended engine always has parked frames and a running one never does.
fn assert_consistent(engine: &DebugEngine) {
    match engine.status() {
        EngineStatus::Suspending | EngineStatus::Suspended => {
            assert!(engine.resume_depth() > 0, "paused with an empty resume stack")
        }
        EngineStatus::Running => assert_eq!(engine.resume_depth(), 0),
        EngineStatus::Resuming => {}
    }
}

#[cfg(test)]
mod breakpoint_tests {
    use super::*;

    #[test]
    fn test_stops_at_breakpoint_then_resumes() {
        let mut vm = Vm::new();
        let main = straight_line(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        let events = engine.subscribe();
        drain(&events);

        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        assert_eq!(engine.status(), EngineStatus::Suspending);
        assert_consistent(&engine);
        // Line 1 already ran.
        assert_eq!(vm.global("x"), Value::Number(1.0));
        assert_eq!(vm.global("y"), Value::Nil);

        engine.poll(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Suspended);
        assert_eq!(suspended_line(&engine), Some(2));

        let seen = drain(&events);
        assert_eq!(
            statuses(&seen),
            vec![EngineStatus::Suspending, EngineStatus::Suspended]
        );
        let payload = serde_json::to_value(&seen[1]).unwrap();
        assert_eq!(payload["body"]["status"], "suspended");
        assert_eq!(payload["body"]["payload"]["url"], FILE);
        assert_eq!(payload["body"]["payload"]["line"], 2);

        engine.resume(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_consistent(&engine);
        assert_eq!(vm.global("y"), Value::Number(2.0));

        let seen = drain(&events);
        assert_eq!(
            statuses(&seen),
            vec![EngineStatus::Resuming, EngineStatus::Running]
        );
        assert_eq!(seen.last(), Some(&DebugEvent::Resumed));
        assert_eq!(vm.live_frames(), 0);
    }

    #[test]
    fn test_runs_through_without_breakpoints() {
        let mut vm = Vm::new();
        let main = straight_line(&mut vm);
        let mut engine = DebugEngine::new(EngineConfig::default());
        let events = engine.subscribe();
        drain(&events);

        assert_eq!(
            engine.execute(&mut vm, main, Vec::new()),
            Execution::Completed(Vec::new())
        );
        engine.poll(&mut vm);
        assert!(statuses(&drain(&events)).is_empty());
        assert_eq!(vm.global("y"), Value::Number(2.0));
    }

    #[test]
    fn test_disabled_stops_skip_breakpoints() {
        let mut vm = Vm::new();
        let main = straight_line(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        assert!(!engine.toggle_stop_at_breakpoints());

        assert_eq!(
            engine.execute(&mut vm, main, Vec::new()),
            Execution::Completed(Vec::new())
        );
    }

    #[test]
    fn test_toggle_is_an_xor_with_one_event_each() {
        let mut engine = DebugEngine::new(EngineConfig::default());
        let events = engine.subscribe();
        drain(&events);

        assert!(engine.toggle_breakpoint(FILE, 3).unwrap());
        assert!(!engine.toggle_breakpoint(FILE, 3).unwrap());
        assert!(engine.toggle_breakpoint(FILE, 3).unwrap());

        assert_eq!(engine.breakpoints()[FILE], vec![false, false, true]);
        let updates: Vec<bool> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                DebugEvent::BreakpointUpdated { is_set, line, .. } => {
                    assert_eq!(line, 3);
                    Some(is_set)
                }
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![true, false, true]);
    }

    #[test]
    fn test_line_zero_is_rejected() {
        let mut engine = DebugEngine::new(EngineConfig::default());
        assert!(matches!(
            engine.toggle_breakpoint(FILE, 0),
            Err(DebuggerError::InvalidLine { line: 0, .. })
        ));
        assert!(engine.breakpoints().is_empty());
    }

    #[test]
    fn test_setting_a_breakpoint_reenables_stops() {
        let mut engine = DebugEngine::new(EngineConfig::default());
        engine.toggle_stop_at_breakpoints();
        let events = engine.subscribe();
        drain(&events);

        engine.toggle_breakpoint(FILE, 1).unwrap();
        assert!(engine.stop_at_breakpoints());
        assert!(drain(&events).contains(&DebugEvent::StopAtBreakpointsUpdated(true)));
    }

    #[test]
    fn test_one_suspend_per_visit() {
        let mut vm = Vm::new();
        let main = looping(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));

        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        let mut stops = 0;
        while engine.status() != EngineStatus::Running {
            engine.poll(&mut vm);
            assert_eq!(suspended_line(&engine), Some(2));
            stops += 1;
            engine.resume(&mut vm);
        }

        assert_eq!(stops, 2);
        assert_eq!(vm.global("i"), Value::Number(2.0));
    }

    #[test]
    fn test_call_line_suspends_once() {
        let mut vm = Vm::new();
        let main = nested_call(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));

        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(2));

        // The store after the call is still on line 2.
        engine.resume(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(vm.global("r"), Value::Number(7.0));
        assert_eq!(vm.global("z"), Value::Number(3.0));
    }

    #[test]
    fn test_returning_from_a_step_in_does_not_refire() {
        let mut vm = Vm::new();
        let main = nested_call(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));

        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);
        engine.step_in(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(10));

        engine.resume(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(vm.global("r"), Value::Number(7.0));
    }

    #[test]
    fn test_store_receives_toggles() {
        let store = MemoryStore::default();
        let mut engine = DebugEngine::with_store(EngineConfig::default(), store.clone());

        engine.toggle_breakpoint(FILE, 2).unwrap();
        engine.toggle_stop_at_breakpoints();

        let saved = store.contents();
        assert_eq!(saved.breakpoints.unwrap()[FILE], vec![false, true]);
        assert_eq!(saved.stop_at_breakpoints, Some(false));

        let restored = DebugEngine::with_store(EngineConfig::default(), store);
        assert_eq!(restored.breakpoints()[FILE], vec![false, true]);
        assert!(!restored.stop_at_breakpoints());
    }
}

#[cfg(test)]
mod stepping_tests {
    use super::*;

    fn stopped_at_call() -> (Vm, DebugEngine) {
        let mut vm = Vm::new();
        let main = with_call(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(2));
        (vm, engine)
    }

    #[test]
    fn test_step_in_enters_the_callee() {
        let (mut vm, mut engine) = stopped_at_call();

        engine.step_in(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(10));
        assert_eq!(engine.resume_depth(), 2);

        let snapshot = engine.current_state().engine.data.snapshot.unwrap();
        assert_eq!(
            snapshot.call_stack,
            vec!["at f (a.lua.json:10)", "at main (a.lua.json:2)"]
        );
    }

    #[test]
    fn test_step_over_skips_the_callee() {
        let (mut vm, mut engine) = stopped_at_call();

        engine.step_over(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(3));
        assert_eq!(engine.resume_depth(), 1);
        // The callee ran to completion in between.
        assert_eq!(vm.global("a"), Value::Number(1.0));
    }

    #[test]
    fn test_step_over_runs_nested_calls_to_completion() {
        let mut vm = Vm::new();
        let main = nested_call(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(2));

        engine.step_over(&mut vm);
        engine.poll(&mut vm);
        // Neither f nor g stopped, and the rest of line 2 ran.
        assert_eq!(suspended_line(&engine), Some(3));
        assert_eq!(engine.resume_depth(), 1);
        assert_eq!(vm.global("r"), Value::Number(7.0));
        assert_eq!(vm.global("z"), Value::Nil);
    }

    #[test]
    fn test_step_over_past_the_end_keeps_stepping() {
        let mut vm = Vm::new();
        // x = 1 / y = 2, no explicit return
        let main = load(
            &mut vm,
            json!({
                "instructions": [[1, 0, 0], [7, 0, 1], [1, 0, 2], [7, 0, 3]],
                "constants": [1, "x", 2, "y"],
                "linePositions": [1, 1, 2, 2]
            }),
        );
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);

        engine.step_over(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.stepping().step_target(), None);

        let next = straight_line(&mut vm);
        assert_eq!(engine.execute(&mut vm, next, Vec::new()), Execution::Suspended);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(1));
    }

    #[test]
    fn test_step_out_returns_to_the_caller() {
        let (mut vm, mut engine) = stopped_at_call();
        engine.step_in(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(10));

        engine.step_out(&mut vm);
        assert_consistent(&engine);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(3));
        assert_eq!(engine.resume_depth(), 1);
    }

    #[test]
    fn test_step_out_of_the_outermost_frame_resumes() {
        let (mut vm, mut engine) = stopped_at_call();
        let events = engine.subscribe();
        drain(&events);

        engine.step_out(&mut vm);
        engine.poll(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(vm.global("z"), Value::Number(3.0));
        assert!(drain(&events).contains(&DebugEvent::Resumed));
    }

    #[test]
    fn test_pause_stops_at_the_next_instruction() {
        let mut vm = Vm::new();
        let main = straight_line(&mut vm);
        let mut engine = DebugEngine::new(EngineConfig::default());

        engine.pause();
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(1));
        assert_eq!(vm.global("x"), Value::Nil);
    }

    #[test]
    fn test_pause_while_suspended_changes_nothing() {
        let (_vm, mut engine) = stopped_at_call();
        let events = engine.subscribe();
        drain(&events);

        engine.pause();
        assert_eq!(engine.status(), EngineStatus::Suspended);
        assert!(statuses(&drain(&events)).is_empty());
    }

    #[test]
    fn test_resume_while_running_still_reports() {
        let mut vm = Vm::new();
        let mut engine = DebugEngine::new(EngineConfig::default());
        let events = engine.subscribe();
        drain(&events);

        engine.resume(&mut vm);
        let seen = drain(&events);
        assert_eq!(
            statuses(&seen),
            vec![EngineStatus::Resuming, EngineStatus::Running]
        );
        assert_eq!(seen.last(), Some(&DebugEvent::Resumed));
    }

    #[test]
    fn test_resume_before_suspend_lands_drops_it() {
        let mut vm = Vm::new();
        let main = straight_line(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        let events = engine.subscribe();
        drain(&events);

        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        engine.resume(&mut vm);
        engine.poll(&mut vm);

        assert_eq!(engine.status(), EngineStatus::Running);
        assert!(!statuses(&drain(&events)).contains(&EngineStatus::Suspended));
        assert_eq!(vm.global("y"), Value::Number(2.0));
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    fn locals_program(vm: &mut Vm) -> Value {
        load(
            vm,
            json!({
                "name": "main",
                "instructions": [[1, 0, 0], [1, 1, 1], [10, 2], [30, 0, 1]],
                "constants": [10, 20],
                "locals": [
                    { "varname": "a", "startpc": 1, "endpc": 4 },
                    { "varname": "b", "startpc": 2, "endpc": 4 }
                ],
                "linePositions": [1, 2, 3, 4]
            }),
        )
    }

    fn locals_at(line: usize) -> serde_json::Value {
        let mut vm = Vm::new();
        let main = locals_program(&mut vm);
        let mut breakpoints = vec![false; line];
        breakpoints[line - 1] = true;
        let mut engine = engine_with(json!({ FILE: breakpoints }));

        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);
        let snapshot = engine.current_state().engine.data.snapshot.unwrap();
        serde_json::to_value(snapshot.locals).unwrap()
    }

    #[test]
    fn test_locals_follow_their_pc_range() {
        assert_eq!(locals_at(1), json!({}));
        assert_eq!(locals_at(2), json!({ "a": 10.0 }));
        assert_eq!(locals_at(3), json!({ "a": 10.0, "b": 20.0 }));
    }

    #[test]
    fn test_globals_hide_bookkeeping() {
        let mut vm = Vm::new();
        let main = straight_line(&mut vm);
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);

        let snapshot = engine.current_state().engine.data.snapshot.unwrap();
        let globals = serde_json::to_value(&snapshot.globals).unwrap();
        assert_eq!(globals["x"], json!(1.0));
        assert!(globals["print"].as_str().unwrap().starts_with("function: 0x"));
        assert!(globals.get("_G").is_none());
        assert!(globals.get("__vm").is_none());
    }

    #[test]
    fn test_tables_render_with_caption_and_fields() {
        let mut vm = Vm::new();
        let main = load(
            &mut vm,
            json!({
                "instructions": [[10, 0], [9, 0, 257, 258], [7, 0, 0], [30, 0, 1]],
                "constants": ["t", "k", "v"],
                "linePositions": [1, 1, 1, 2]
            }),
        );
        let mut engine = engine_with(json!({ FILE: [false, true] }));
        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);

        let snapshot = engine.current_state().engine.data.snapshot.unwrap();
        let table = serde_json::to_value(&snapshot.globals["t"]).unwrap();
        assert!(table["caption"].as_str().unwrap().starts_with("table: 0x"));
        assert_eq!(table["fields"], json!({ "k": "v" }));
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    // error("bad") on line 5
    fn raising(vm: &mut Vm, message: &str) -> Value {
        load(
            vm,
            json!({
                "instructions": [[5, 0, 0], [1, 1, 1], [28, 0, 2, 1], [30, 0, 1]],
                "constants": ["error", message],
                "linePositions": [5, 5, 5, 6]
            }),
        )
    }

    #[test]
    fn test_errors_are_indexed_and_logged_once() {
        let mut vm = Vm::new();
        let mut engine = DebugEngine::new(EngineConfig::default());
        let events = engine.subscribe();
        drain(&events);

        let first = raising(&mut vm, "bad");
        let err = match engine.execute(&mut vm, first, Vec::new()) {
            Execution::Failed(err) => err,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(err.message, "bad");
        assert!(err.to_string().ends_with(&format!("[lua-debugger:error:{}]", err.index.unwrap())));

        let log = engine.error_log().to_vec();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].file_id.as_deref(), Some(FILE));
        assert_eq!(log[0].line_number, Some(5));
        assert_eq!(log[0].message, "bad");

        // Reporting again, typed or as text, is a no-op.
        assert!(engine.report_uncaught(&err).is_none());
        assert!(engine.report_uncaught_message(&err.to_string()).is_none());
        assert_eq!(engine.error_log().len(), 1);

        let second = raising(&mut vm, "worse");
        let later = match engine.execute(&mut vm, second, Vec::new()) {
            Execution::Failed(err) => err,
            other => panic!("expected failure, got {:?}", other),
        };
        assert!(later.index > err.index);

        let errors = drain(&events)
            .into_iter()
            .filter(|e| matches!(e, DebugEvent::Error(_)))
            .count();
        assert_eq!(errors, 2);
    }

    #[test]
    fn test_host_errors_are_wrapped() {
        let mut vm = Vm::new();
        vm.register_host("explode", |_, _| {
            Err(HostError::new("disk on fire")
                .with_backtrace(vec!["at flush".to_string()])
                .into())
        });
        let main = load(
            &mut vm,
            json!({
                "instructions": [[5, 0, 0], [28, 0, 1, 1], [30, 0, 1]],
                "constants": ["explode"],
                "linePositions": [4, 4, 5]
            }),
        );
        let mut engine = DebugEngine::new(EngineConfig::default());

        let err = match engine.execute(&mut vm, main, Vec::new()) {
            Execution::Failed(err) => err,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(err.message, "Error in host call: disk on fire\n    at flush");
        assert_eq!(err.stack, vec![StackEntry { frame: FrameId(0), pc: 1 }]);
        assert_eq!(vm.last_traceback(), Some("    at function (a.lua.json:4)"));
        assert_eq!(engine.error_log()[0].line_number, Some(4));
    }

    #[test]
    fn test_step_over_a_raising_line_keeps_stepping() {
        let mut vm = Vm::new();
        let main = raising(&mut vm, "mid step");
        let mut engine = engine_with(json!({ FILE: [false, false, false, false, true] }));
        engine.execute(&mut vm, main, Vec::new());
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(5));

        engine.step_over(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.error_log().len(), 1);
        assert_eq!(engine.stepping().step_target(), None);

        let next = straight_line(&mut vm);
        assert_eq!(engine.execute(&mut vm, next, Vec::new()), Execution::Suspended);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(1));
    }

    #[test]
    fn test_error_while_resuming_returns_to_running() {
        let mut vm = Vm::new();
        let main = raising(&mut vm, "late");
        let mut engine = engine_with(json!({ FILE: [false, false, false, false, true] }));

        assert_eq!(engine.execute(&mut vm, main, Vec::new()), Execution::Suspended);
        engine.poll(&mut vm);
        assert_eq!(suspended_line(&engine), Some(5));

        engine.resume(&mut vm);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.resume_depth(), 0);
        assert_eq!(engine.error_log().len(), 1);
        assert_eq!(engine.error_log()[0].message, "late");
        assert_eq!(vm.live_frames(), 0);
    }

    #[test]
    fn test_unknown_text_errors_are_ignored() {
        let mut engine = DebugEngine::new(EngineConfig::default());
        assert!(engine.report_uncaught_message("plain failure").is_none());
        assert!(engine
            .report_uncaught_message("boom [lua-debugger:error:99]")
            .is_none());
        assert!(engine.error_log().is_empty());
    }
}

#[cfg(test)]
mod file_loading_tests {
    use super::*;
    use std::io;

    #[test]
    fn test_loaded_sources_are_recorded() {
        let mut engine = DebugEngine::new(EngineConfig::default());
        let events = engine.subscribe();
        drain(&events);

        let ok = engine.handle_file_loaded("game/main.lua.json", Some("../src/main.lua"), |url| {
            assert_eq!(url, "src/main.lua");
            Ok("print('hi')".to_string())
        });
        assert!(ok);

        let state = engine.current_state();
        assert_eq!(state.loaded["game/main.lua.json"].filename, "src/main.lua");
        assert!(state.breakpoints.contains_key("game/main.lua.json"));
        assert!(matches!(
            &drain(&events)[..],
            [DebugEvent::LuaLoaded { url, .. }] if url == "src/main.lua"
        ));
    }

    #[test]
    fn test_missing_sources_are_reported() {
        let mut engine = DebugEngine::new(EngineConfig::default());
        let events = engine.subscribe();
        drain(&events);

        let ok = engine.handle_file_loaded("lib.json", None, |_| {
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        });
        assert!(!ok);

        let state = engine.current_state();
        assert_eq!(state.loaded["lib.json"].filename, "lib.lua");
        assert_eq!(state.loaded["lib.json"].source, None);
        assert!(matches!(
            &drain(&events)[..],
            [DebugEvent::LuaLoadFailed { message, .. }] if message == "gone"
        ));
    }
}
