use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::Receiver;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::protocol::{write_message, DapMessage, DapMessageContent};
use crate::debugger::{DebugEngine, DebugEvent, Execution};
use crate::executor::{self, Vm};

/// Drives one engine and one VM from protocol requests, forwarding every
/// engine event to the client.
pub struct DapServer<W: Write> {
    seq: u64,
    out: W,
    engine: DebugEngine,
    vm: Vm,
    events: Receiver<DebugEvent>,
}

impl<W: Write> DapServer<W> {
    pub fn new(mut engine: DebugEngine, out: W) -> Self {
        let events = engine.subscribe();
        Self {
            seq: 0,
            out,
            engine,
            vm: Vm::new(),
            events,
        }
    }

    pub fn engine(&self) -> &DebugEngine {
        &self.engine
    }

    pub fn into_parts(self) -> (DebugEngine, W) {
        (self.engine, self.out)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn send_response(
        &mut self,
        request_seq: u64,
        command: String,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> io::Result<()> {
        let msg = DapMessage {
            seq: self.next_seq(),
            msg_type: "response".to_string(),
            content: DapMessageContent::Response {
                request_seq,
                success,
                command,
                message,
                body,
            },
        };
        write_message(&mut self.out, &msg)
    }

    pub fn send_event(&mut self, event: &str, body: Option<Value>) -> io::Result<()> {
        let msg = DapMessage {
            seq: self.next_seq(),
            msg_type: "event".to_string(),
            content: DapMessageContent::Event {
                event: event.to_string(),
                body,
            },
        };
        write_message(&mut self.out, &msg)
    }

    /// Handle one client message. Returns `false` once the client asked to
    /// disconnect.
    pub fn handle(&mut self, msg: DapMessage) -> io::Result<bool> {
        let DapMessageContent::Request { command, arguments } = msg.content else {
            debug!(seq = msg.seq, "ignoring non-request message");
            return Ok(true);
        };
        debug!(seq = msg.seq, %command, "request");

        let keep_going = match command.as_str() {
            "initialize" => {
                self.send_response(msg.seq, command, true, None, Some(capabilities()))?;
                self.send_event("initialized", None)?;
                true
            }
            "launch" => {
                self.handle_launch(msg.seq, command, arguments)?;
                true
            }
            "toggleBreakpoint" => {
                self.handle_toggle_breakpoint(msg.seq, command, arguments)?;
                true
            }
            "toggleStopAtBreakpoints" => {
                let stop = self.engine.toggle_stop_at_breakpoints();
                let body = json!({ "stopAtBreakpoints": stop });
                self.send_response(msg.seq, command, true, None, Some(body))?;
                true
            }
            "stepIn" => {
                self.engine.step_in(&mut self.vm);
                self.send_response(msg.seq, command, true, None, None)?;
                true
            }
            "stepOver" | "next" => {
                self.engine.step_over(&mut self.vm);
                self.send_response(msg.seq, command, true, None, None)?;
                true
            }
            "stepOut" => {
                self.engine.step_out(&mut self.vm);
                self.send_response(msg.seq, command, true, None, None)?;
                true
            }
            "resume" | "continue" => {
                self.engine.resume(&mut self.vm);
                self.send_response(msg.seq, command, true, None, None)?;
                true
            }
            "pause" => {
                self.engine.pause();
                self.send_response(msg.seq, command, true, None, None)?;
                true
            }
            "autoStep" => {
                let enabled = self.engine.auto_step(&mut self.vm);
                let body = json!({ "autoStep": enabled });
                self.send_response(msg.seq, command, true, None, Some(body))?;
                true
            }
            "getCurrentState" => {
                let body = serde_json::to_value(self.engine.current_state())?;
                self.send_response(msg.seq, command, true, None, Some(body))?;
                true
            }
            "disconnect" => {
                self.send_response(msg.seq, command, true, None, None)?;
                false
            }
            _ => {
                warn!(%command, "unhandled request");
                let message = format!("unknown command: {}", command);
                self.send_response(msg.seq, command, false, Some(message), None)?;
                true
            }
        };

        self.flush()?;
        Ok(keep_going)
    }

    fn handle_launch(&mut self, seq: u64, command: String, args: Option<Value>) -> io::Result<()> {
        let Some(program) = args
            .as_ref()
            .and_then(|v| v.get("program"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            let message = "launch needs a program".to_string();
            return self.send_response(seq, command, false, Some(message), None);
        };
        let stop_on_entry = args
            .as_ref()
            .and_then(|v| v.get("stopOnEntry"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        info!(%program, stop_on_entry, "launch");
        match executor::launch(&mut self.engine, &mut self.vm, Path::new(&program), stop_on_entry) {
            Ok(execution) => {
                let body = match execution {
                    Execution::Completed(_) => json!({ "outcome": "completed" }),
                    Execution::Suspended => json!({ "outcome": "suspended" }),
                    Execution::Queued => json!({ "outcome": "queued" }),
                    Execution::Failed(err) => json!({
                        "outcome": "failed",
                        "message": err.message,
                        "traceback": self.vm.last_traceback(),
                    }),
                };
                self.send_response(seq, command, true, None, Some(body))
            }
            Err(err) => {
                warn!(%program, %err, "launch failed");
                self.send_response(seq, command, false, Some(err.to_string()), None)
            }
        }
    }

    fn handle_toggle_breakpoint(
        &mut self,
        seq: u64,
        command: String,
        args: Option<Value>,
    ) -> io::Result<()> {
        let file_id = args
            .as_ref()
            .and_then(|v| v.get("fileId"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let line = args
            .as_ref()
            .and_then(|v| v.get("line"))
            .and_then(|v| v.as_u64());

        let (Some(file_id), Some(line)) = (file_id, line) else {
            let message = "toggleBreakpoint needs fileId and line".to_string();
            return self.send_response(seq, command, false, Some(message), None);
        };

        match self.engine.toggle_breakpoint(&file_id, line as usize) {
            Ok(is_set) => {
                let body = json!({ "fileId": file_id, "line": line, "isSet": is_set });
                self.send_response(seq, command, true, None, Some(body))
            }
            Err(err) => self.send_response(seq, command, false, Some(err.to_string()), None),
        }
    }

    /// Run due timers, then push out whatever they produced.
    pub fn tick(&mut self) -> io::Result<()> {
        self.engine.poll(&mut self.vm);
        self.flush()
    }

    /// Forward program output and pending engine events.
    fn flush(&mut self) -> io::Result<()> {
        for line in self.vm.take_output() {
            self.send_event("output", Some(json!({ "output": format!("{}\n", line) })))?;
        }
        while let Ok(event) = self.events.try_recv() {
            let mut value = serde_json::to_value(&event)?;
            let body = value.get_mut("body").map(Value::take);
            self.send_event(event.name(), body)?;
        }
        Ok(())
    }
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": false,
        "supportsStepBack": false,
        "supportsConditionalBreakpoints": false,
        "supportsSetVariable": false,
        "commands": [
            "launch", "toggleBreakpoint", "toggleStopAtBreakpoints", "stepIn",
            "stepOver", "stepOut", "resume", "pause", "autoStep", "getCurrentState",
            "disconnect"
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dap::protocol::read_message;
    use std::io::Cursor;

    fn request(seq: u64, command: &str, arguments: Option<Value>) -> DapMessage {
        DapMessage {
            seq,
            msg_type: "request".to_string(),
            content: DapMessageContent::Request {
                command: command.to_string(),
                arguments,
            },
        }
    }

    fn sent(server: DapServer<Vec<u8>>) -> Vec<DapMessage> {
        let (_, out) = server.into_parts();
        let mut reader = Cursor::new(out);
        std::iter::from_fn(|| read_message(&mut reader).unwrap()).collect()
    }

    fn event_names(messages: &[DapMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match &m.content {
                DapMessageContent::Event { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn initialize_answers_then_announces() {
        let mut server = DapServer::new(DebugEngine::new(EngineConfig::default()), Vec::new());
        assert!(server.handle(request(1, "initialize", None)).unwrap());

        let messages = sent(server);
        assert!(matches!(
            messages[0].content,
            DapMessageContent::Response { request_seq: 1, success: true, .. }
        ));
        // The subscription is primed with the breakpoint map and stop flag.
        assert_eq!(
            event_names(&messages),
            vec!["initialized", "breakpoints-updated", "stop-at-breakpoints-updated"]
        );
    }

    #[test]
    fn toggle_breakpoint_round_trips_through_events() {
        let mut server = DapServer::new(DebugEngine::new(EngineConfig::default()), Vec::new());
        let args = json!({ "fileId": "main.lua.json", "line": 3 });
        server.handle(request(1, "toggleBreakpoint", Some(args))).unwrap();

        let messages = sent(server);
        let body = messages.iter().find_map(|m| match &m.content {
            DapMessageContent::Response { body, .. } => body.clone(),
            _ => None,
        });
        assert_eq!(
            body,
            Some(json!({ "fileId": "main.lua.json", "line": 3, "isSet": true }))
        );
        assert!(event_names(&messages).contains(&"breakpoint-updated".to_string()));
    }

    #[test]
    fn bad_requests_fail_without_disconnecting() {
        let mut server = DapServer::new(DebugEngine::new(EngineConfig::default()), Vec::new());
        assert!(server.handle(request(1, "frobnicate", None)).unwrap());
        assert!(server
            .handle(request(2, "toggleBreakpoint", Some(json!({ "fileId": "x", "line": 0 }))))
            .unwrap());
        assert!(!server.handle(request(3, "disconnect", None)).unwrap());

        let failures = sent(server)
            .into_iter()
            .filter(|m| matches!(m.content, DapMessageContent::Response { success: false, .. }))
            .count();
        assert_eq!(failures, 2);
    }
}
