use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lua_debugger::dap;
use lua_debugger::debugger::{DebugEngine, DebugEvent, EngineStatus, FileStore};
use lua_debugger::executor::{self, Vm};
use lua_debugger::{EngineConfig, Execution};

#[derive(Parser, Debug)]
#[command(name = "lua-debugger")]
#[command(about = "Debug compiled Lua chunks from a console or a protocol client")]
struct Cli {
    /// Speak the framed JSON protocol on stdio instead of the console
    #[arg(long, alias = "debug-adapter")]
    dap: bool,

    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// File that keeps breakpoints between sessions
    #[arg(long)]
    store: Option<PathBuf>,

    /// Suspend before the first instruction
    #[arg(long)]
    stop_on_entry: bool,

    /// Compiled chunk to run (`*.lua.json`)
    program: Option<PathBuf>,
}

fn main() {
    // Logs go to stderr; stdout belongs to the protocol or the console.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = match &cli.store {
        Some(path) => DebugEngine::with_store(config, FileStore::new(path)),
        None => DebugEngine::new(config),
    };

    if cli.dap {
        info!("starting in DAP mode");
        dap::run_dap_mode(engine)?;
        return Ok(());
    }

    let Some(program) = cli.program else {
        return Err("no program given; pass a *.lua.json file or --dap".into());
    };
    Console::new(engine).run(&program, cli.stop_on_entry)?;
    Ok(())
}

/// Line-oriented front end over one engine and one VM.
struct Console {
    engine: DebugEngine,
    vm: Vm,
    events: Receiver<DebugEvent>,
}

impl Console {
    fn new(mut engine: DebugEngine) -> Self {
        let events = engine.subscribe();
        Self {
            engine,
            vm: Vm::new(),
            events,
        }
    }

    fn run(mut self, program: &Path, stop_on_entry: bool) -> io::Result<()> {
        // Breakpoints restored from the store are already known.
        while self.events.try_recv().is_ok() {}

        match executor::launch(&mut self.engine, &mut self.vm, program, stop_on_entry) {
            Ok(Execution::Failed(err)) => {
                println!("error: {}", err.message);
                if let Some(traceback) = self.vm.last_traceback() {
                    println!("{}", traceback);
                }
            }
            Ok(_) => {}
            Err(err) => {
                println!("cannot launch {}: {}", program.display(), err);
                return Ok(());
            }
        }
        self.settle();

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("(luadbg) ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line?;
            let Some(words) = shlex::split(&line) else {
                println!("unbalanced quotes");
                continue;
            };
            if words.is_empty() {
                continue;
            }
            if !self.command(&words) {
                break;
            }
            self.settle();
        }

        self.engine.shutdown();
        Ok(())
    }

    /// Returns `false` when the console should exit.
    fn command(&mut self, words: &[String]) -> bool {
        match words[0].as_str() {
            "break" | "b" => match (words.get(1), words.get(2).map(|l| l.parse::<usize>())) {
                (Some(file), Some(Ok(line))) => {
                    if let Err(err) = self.engine.toggle_breakpoint(file, line) {
                        println!("{}", err);
                    }
                }
                _ => println!("usage: break FILE LINE"),
            },
            "stops" => {
                self.engine.toggle_stop_at_breakpoints();
            }
            "step" | "s" => self.engine.step_in(&mut self.vm),
            "next" | "n" => self.engine.step_over(&mut self.vm),
            "out" | "o" => self.engine.step_out(&mut self.vm),
            "continue" | "c" => self.engine.resume(&mut self.vm),
            "pause" => self.engine.pause(),
            "auto" => {
                let enabled = self.engine.auto_step(&mut self.vm);
                println!("auto step {}", if enabled { "on" } else { "off" });
            }
            "state" => match serde_json::to_string_pretty(&self.engine.current_state()) {
                Ok(text) => println!("{}", text),
                Err(err) => println!("{}", err),
            },
            "quit" | "q" => return false,
            "help" | "h" => print_help(),
            other => println!("unknown command '{}', try help", other),
        }
        true
    }

    /// Run deferred work until nothing is due, sleeping through auto-step
    /// delays, and print what happened.
    fn settle(&mut self) {
        loop {
            self.engine.poll(&mut self.vm);
            self.report();

            let Some(due) = self.engine.next_due() else {
                break;
            };
            let auto = self.engine.stepping().is_auto_stepping();
            let now = Instant::now();
            if due > now {
                if !auto {
                    break;
                }
                thread::sleep(due - now);
            }
        }
    }

    fn report(&mut self) {
        for line in self.vm.take_output() {
            println!("{}", line);
        }
        while let Ok(event) = self.events.try_recv() {
            match event {
                DebugEvent::StateUpdated {
                    status: EngineStatus::Suspended,
                    payload,
                } => {
                    if let Some(at) = &payload.location {
                        println!("stopped at {}:{}", at.url, at.line);
                    }
                    if let Some(snapshot) = &payload.snapshot {
                        for (name, value) in &snapshot.locals {
                            println!("  {} = {}", name, serde_json::json!(value));
                        }
                        for frame in &snapshot.call_stack {
                            println!("  {}", frame);
                        }
                    }
                }
                DebugEvent::StateUpdated { .. } => {}
                DebugEvent::BreakpointUpdated { file_id, line, is_set } => {
                    let verb = if is_set { "set" } else { "cleared" };
                    println!("breakpoint {} at {}:{}", verb, file_id, line);
                }
                DebugEvent::StopAtBreakpointsUpdated(stop) => {
                    println!("stop at breakpoints: {}", stop);
                }
                DebugEvent::Error(record) => {
                    println!("error #{}: {}", record.index, record.message);
                }
                DebugEvent::LuaLoadFailed { url, message, .. } => {
                    println!("no source for {}: {}", url, message);
                }
                DebugEvent::Resumed
                | DebugEvent::BreakpointsUpdated(_)
                | DebugEvent::LuaLoaded { .. } => {}
            }
        }
    }
}

fn print_help() {
    println!("break FILE LINE   toggle a breakpoint");
    println!("stops             toggle stopping at breakpoints");
    println!("step | next | out step in, over or out");
    println!("continue          resume execution");
    println!("pause             stop at the next instruction");
    println!("auto              toggle auto-stepping");
    println!("state             dump the debugger state");
    println!("quit              exit");
}
