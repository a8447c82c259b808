use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use super::builtins;
use super::program::{Chunk, Instruction, Proto, RK_CONSTANT};
use crate::interp::{
    opcode, CoroutineId, Decision, ExecError, ExecutionHook, FrameId, FrameView, FunctionId,
    HostError, InstructionSite, Interpreter, LocalVar, Resumable, RunOutcome, RuntimeError,
    StackEntry, TableRef, Value,
};

const MOVE: u8 = 0;
const LOADK: u8 = 1;
const LOADBOOL: u8 = 2;
const LOADNIL: u8 = 3;
const GETUPVAL: u8 = 4;
const GETGLOBAL: u8 = 5;
const GETTABLE: u8 = 6;
const SETGLOBAL: u8 = 7;
const SETUPVAL: u8 = 8;
const SETTABLE: u8 = 9;
const NEWTABLE: u8 = 10;
const ADD: u8 = 12;
const SUB: u8 = 13;
const MUL: u8 = 14;
const DIV: u8 = 15;
const JMP: u8 = 22;
const EQ: u8 = 23;
const LT: u8 = 24;
const LE: u8 = 25;
const CALL: u8 = 28;

const MAX_CALL_DEPTH: usize = 200;

pub type HostFn = Rc<dyn Fn(&mut Vm, Vec<Value>) -> Result<Vec<Value>, ExecError>>;

pub(crate) struct Closure {
    proto: Rc<Proto>,
    upvalues: Vec<Rc<RefCell<Value>>>,
    file_id: Rc<str>,
}

#[derive(Clone)]
enum Callable {
    Lua(Rc<Closure>),
    Host(HostFn),
}

/// A live call activation.
struct Activation {
    id: FrameId,
    closure: Rc<Closure>,
    registers: Vec<Value>,
    pc: usize,
    /// Where the results of the call in flight go: (first register, C).
    pending_call: Option<(usize, i32)>,
}

impl FrameView for Activation {
    fn id(&self) -> FrameId {
        self.id
    }

    fn pc(&self) -> usize {
        self.pc
    }

    fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    fn file_id(&self) -> &str {
        &self.closure.file_id
    }

    fn locals(&self) -> &[LocalVar] {
        &self.closure.proto.locals
    }

    fn register(&self, slot: usize) -> Value {
        self.registers.get(slot).cloned().unwrap_or_default()
    }

    fn upvalues(&self) -> Vec<(String, Value)> {
        self.closure
            .proto
            .upvalues
            .iter()
            .zip(&self.closure.upvalues)
            .map(|(name, cell)| (name.clone(), cell.borrow().clone()))
            .collect()
    }
}

enum Flow {
    Next,
    Enter(FrameId),
    Return(Vec<Value>),
}

/// Reference register VM. Frames run on an explicit stack, so a suspend
/// is a plain return and a resume rebuilds the stack from parked frames.
pub struct Vm {
    globals: TableRef,
    functions: HashMap<FunctionId, Callable>,
    frames: HashMap<FrameId, Activation>,
    next_frame: u64,
    next_function: u64,
    output: Vec<String>,
    traceback: Option<String>,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            globals: TableRef::new(),
            functions: HashMap::new(),
            frames: HashMap::new(),
            next_frame: 0,
            next_function: 0,
            output: Vec::new(),
            traceback: None,
        };
        vm.globals.set("_G".to_string(), Value::Table(vm.globals.clone()));
        vm.globals
            .set("__vm".to_string(), Value::from(env!("CARGO_PKG_VERSION")));
        builtins::install(&mut vm);
        vm
    }

    /// Expose a host function as a global.
    pub fn register_host<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut Vm, Vec<Value>) -> Result<Vec<Value>, ExecError> + 'static,
    {
        let id = self.mint_function(Callable::Host(Rc::new(func)));
        self.globals.set(name.to_string(), Value::Function(id));
    }

    /// Turn a chunk into a callable main function tagged with `file_id`.
    pub fn load(&mut self, chunk: &Chunk, file_id: &str) -> Value {
        let closure = Closure {
            proto: Rc::new(chunk.main.clone()),
            upvalues: Vec::new(),
            file_id: Rc::from(file_id),
        };
        debug!(file_id, instructions = chunk.main.instructions.len(), "chunk loaded");
        Value::Function(self.mint_function(Callable::Lua(Rc::new(closure))))
    }

    pub fn global(&self, name: &str) -> Value {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.set(name.to_string(), value);
    }

    pub(crate) fn print(&mut self, line: String) {
        self.output.push(line);
    }

    /// Lines written by `print` since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Rendered stack of the last runtime error, captured before its
    /// frames were torn down.
    pub fn last_traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    /// Activations still alive, running or parked.
    pub fn live_frames(&self) -> usize {
        self.frames.len()
    }

    fn mint_function(&mut self, callable: Callable) -> FunctionId {
        let id = FunctionId(self.next_function);
        self.next_function += 1;
        self.functions.insert(id, callable);
        id
    }

    fn push_activation(&mut self, closure: Rc<Closure>, mut args: Vec<Value>) -> FrameId {
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        let params = closure.proto.num_params;
        args.resize(params, Value::Nil);
        self.frames.insert(
            id,
            Activation {
                id,
                closure,
                registers: args,
                pc: 0,
                pending_call: None,
            },
        );
        id
    }

    fn activation(&self, id: FrameId) -> &Activation {
        &self.frames[&id]
    }

    fn activation_mut(&mut self, id: FrameId) -> &mut Activation {
        self.frames
            .get_mut(&id)
            .expect("activation on the run stack is registered")
    }

    fn reg(&self, frame: FrameId, index: usize) -> Value {
        self.activation(frame).register(index)
    }

    fn set_reg(&mut self, frame: FrameId, index: usize, value: Value) {
        let registers = &mut self.activation_mut(frame).registers;
        if registers.len() <= index {
            registers.resize(index + 1, Value::Nil);
        }
        registers[index] = value;
    }

    fn constant(
        &self,
        frame: FrameId,
        index: i32,
        hook: &mut dyn ExecutionHook,
    ) -> Result<Value, ExecError> {
        let proto = &self.activation(frame).closure.proto;
        match usize::try_from(index).ok().and_then(|i| proto.constants.get(i)) {
            Some(constant) => Ok(Value::from(constant)),
            None => raise(hook, format!("constant {} out of range", index)),
        }
    }

    fn rk(&self, frame: FrameId, operand: i32, hook: &mut dyn ExecutionHook) -> Result<Value, ExecError> {
        if operand >= RK_CONSTANT {
            self.constant(frame, operand - RK_CONSTANT, hook)
        } else {
            Ok(self.reg(frame, operand.max(0) as usize))
        }
    }

    fn upvalue_cell(
        &self,
        frame: FrameId,
        index: i32,
        hook: &mut dyn ExecutionHook,
    ) -> Result<Rc<RefCell<Value>>, ExecError> {
        let closure = &self.activation(frame).closure;
        match usize::try_from(index).ok().and_then(|i| closure.upvalues.get(i)) {
            Some(cell) => Ok(cell.clone()),
            None => raise(hook, format!("upvalue {} out of range", index)),
        }
    }

    fn jump(&mut self, frame: FrameId, offset: i32) {
        let activation = self.activation_mut(frame);
        activation.pc = (activation.pc as i64 + offset as i64).max(0) as usize;
    }

    fn run(
        &mut self,
        mut stack: Vec<FrameId>,
        hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError> {
        loop {
            let Some(&current) = stack.last() else {
                return Ok(RunOutcome::Completed(Vec::new()));
            };

            let activation = self.activation_mut(current);
            let proto = activation.closure.proto.clone();
            let pc = activation.pc;

            let flow = match proto.instructions.get(pc).copied() {
                // Falling off the end is an implicit bare return.
                None => match hook.after_instruction(current, pc, opcode::RETURN, Ok(())) {
                    Ok(()) => Flow::Return(Vec::new()),
                    Err(err) => return Err(self.unwind(&stack, err)),
                },
                Some(instruction) => {
                    activation.pc += 1;
                    let site = InstructionSite {
                        frame: activation,
                        pc,
                        line: proto.line_at(pc),
                        opcode: instruction.op,
                        coroutine_resuming: false,
                    };
                    if hook.before_instruction(site) == Decision::Suspend {
                        for &caller in stack.iter().rev().skip(1) {
                            hook.park(Resumable::Call(caller));
                        }
                        debug!(frame = current.0, pc, depth = stack.len(), "suspended");
                        return Ok(RunOutcome::Suspended);
                    }

                    trace!(frame = current.0, pc, op = instruction.op, "exec");
                    let (status, flow) = match self.step(current, instruction, hook) {
                        Ok(flow) => (Ok(()), Some(flow)),
                        Err(ExecError::Runtime(err)) => (Err(err), None),
                        Err(ExecError::Host(mut err)) => {
                            err.stack.push(StackEntry { frame: current, pc });
                            return Err(self.unwind(&stack, err));
                        }
                    };

                    if let Err(err) = hook.after_instruction(current, pc, instruction.op, status) {
                        return Err(self.unwind(&stack, err));
                    }
                    match flow {
                        Some(flow) => flow,
                        None => continue,
                    }
                }
            };

            match flow {
                Flow::Next => {}
                Flow::Enter(frame) => {
                    stack.push(frame);
                    if stack.len() > MAX_CALL_DEPTH {
                        let err = hook.runtime_error("stack overflow".to_string());
                        self.traceback = None;
                        self.abandon(&stack);
                        return Err(err.into());
                    }
                }
                Flow::Return(values) => {
                    stack.pop();
                    self.frames.remove(&current);
                    match stack.last() {
                        Some(&caller) => self.deliver(caller, values),
                        None => return Ok(RunOutcome::Completed(values)),
                    }
                }
            }
        }
    }

    /// Complete the trace of an error raised in the innermost frame with
    /// every caller, render it, and drop the frames.
    fn unwind<E>(&mut self, stack: &[FrameId], mut err: E) -> ExecError
    where
        E: Unwinding + Into<ExecError>,
    {
        for &caller in stack.iter().rev().skip(1) {
            let pc = self.activation(caller).pc.saturating_sub(1);
            err.trace().push(StackEntry { frame: caller, pc });
        }
        self.traceback = Some(self.render_stack(err.trace()));
        self.abandon(stack);
        err.into()
    }

    fn abandon(&mut self, stack: &[FrameId]) {
        for id in stack {
            self.frames.remove(id);
        }
    }

    /// Hand return values to the caller's pending CALL.
    fn deliver(&mut self, caller: FrameId, values: Vec<Value>) {
        if let Some((base, c)) = self.activation_mut(caller).pending_call.take() {
            self.place_results(caller, base, c, values);
        }
    }

    fn place_results(&mut self, frame: FrameId, base: usize, c: i32, values: Vec<Value>) {
        if c == 0 {
            for (i, value) in values.into_iter().enumerate() {
                self.set_reg(frame, base + i, value);
            }
        } else {
            let wanted = (c - 1).max(0) as usize;
            let mut values = values.into_iter();
            for i in 0..wanted {
                self.set_reg(frame, base + i, values.next().unwrap_or_default());
            }
        }
    }

    fn step(
        &mut self,
        frame: FrameId,
        instruction: Instruction,
        hook: &mut dyn ExecutionHook,
    ) -> Result<Flow, ExecError> {
        let Instruction { op, a, b, c } = instruction;
        let ra = a.max(0) as usize;

        match op {
            MOVE => {
                let value = self.reg(frame, b.max(0) as usize);
                self.set_reg(frame, ra, value);
            }
            LOADK => {
                let value = self.constant(frame, b, hook)?;
                self.set_reg(frame, ra, value);
            }
            LOADBOOL => {
                self.set_reg(frame, ra, Value::Boolean(b != 0));
                if c != 0 {
                    self.jump(frame, 1);
                }
            }
            LOADNIL => {
                for r in ra..=(b.max(a).max(0) as usize) {
                    self.set_reg(frame, r, Value::Nil);
                }
            }
            GETUPVAL => {
                let value = self.upvalue_cell(frame, b, hook)?.borrow().clone();
                self.set_reg(frame, ra, value);
            }
            GETGLOBAL => {
                let name = self.constant(frame, b, hook)?.coerce_string();
                let value = self.globals.get(&name);
                self.set_reg(frame, ra, value);
            }
            GETTABLE => {
                let table = self.reg(frame, b.max(0) as usize);
                let key = self.rk(frame, c, hook)?;
                let value = match table {
                    Value::Table(t) => t.get(&key.coerce_string()),
                    other => return raise(hook, format!("attempt to index a {} value", other.type_name())),
                };
                self.set_reg(frame, ra, value);
            }
            SETGLOBAL => {
                let name = self.constant(frame, b, hook)?.coerce_string();
                let value = self.reg(frame, ra);
                self.globals.set(name, value);
            }
            SETUPVAL => {
                let value = self.reg(frame, ra);
                *self.upvalue_cell(frame, b, hook)?.borrow_mut() = value;
            }
            SETTABLE => {
                let key = self.rk(frame, b, hook)?;
                let value = self.rk(frame, c, hook)?;
                match self.reg(frame, ra) {
                    Value::Table(t) => {
                        if key.is_nil() {
                            return raise(hook, "table index is nil".to_string());
                        }
                        t.set(key.coerce_string(), value);
                    }
                    other => return raise(hook, format!("attempt to index a {} value", other.type_name())),
                }
            }
            NEWTABLE => self.set_reg(frame, ra, Value::Table(TableRef::new())),
            ADD | SUB | MUL | DIV => {
                let lhs = self.rk(frame, b, hook)?;
                let rhs = self.rk(frame, c, hook)?;
                let (x, y) = match (lhs.as_number(), rhs.as_number()) {
                    (Some(x), Some(y)) => (x, y),
                    (None, _) => return arith_error(hook, &lhs),
                    (_, None) => return arith_error(hook, &rhs),
                };
                let result = match op {
                    ADD => x + y,
                    SUB => x - y,
                    MUL => x * y,
                    _ => x / y,
                };
                self.set_reg(frame, ra, Value::Number(result));
            }
            JMP => self.jump(frame, b),
            EQ => {
                let equal = self.rk(frame, b, hook)? == self.rk(frame, c, hook)?;
                if equal != (a != 0) {
                    self.jump(frame, 1);
                }
            }
            LT | LE => {
                let lhs = self.rk(frame, b, hook)?;
                let rhs = self.rk(frame, c, hook)?;
                let ordering = match (&lhs, &rhs) {
                    (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
                    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                    _ => {
                        return raise(
                            hook,
                            format!("attempt to compare {} with {}", lhs.type_name(), rhs.type_name()),
                        )
                    }
                };
                let holds = match ordering {
                    Some(std::cmp::Ordering::Less) => true,
                    Some(std::cmp::Ordering::Equal) => op == LE,
                    _ => false,
                };
                if holds != (a != 0) {
                    self.jump(frame, 1);
                }
            }
            CALL => return self.call_instruction(frame, ra, b, c, hook),
            opcode::RETURN => {
                let count = (b - 1).max(0) as usize;
                let values = (0..count).map(|i| self.reg(frame, ra + i)).collect();
                return Ok(Flow::Return(values));
            }
            opcode::CLOSE => {}
            opcode::CLOSURE => self.make_closure(frame, ra, b, hook)?,
            other => return raise(hook, format!("unknown opcode {}", other)),
        }
        Ok(Flow::Next)
    }

    fn call_instruction(
        &mut self,
        frame: FrameId,
        base: usize,
        b: i32,
        c: i32,
        hook: &mut dyn ExecutionHook,
    ) -> Result<Flow, ExecError> {
        let callee = self.reg(frame, base);
        let argc = (b - 1).max(0) as usize;
        let args = (1..=argc).map(|i| self.reg(frame, base + i)).collect();

        match self.callable(&callee) {
            Some(Callable::Lua(closure)) => {
                self.activation_mut(frame).pending_call = Some((base, c));
                Ok(Flow::Enter(self.push_activation(closure, args)))
            }
            Some(Callable::Host(func)) => {
                let results = self.call_host(func, args, hook)?;
                self.place_results(frame, base, c, results);
                Ok(Flow::Next)
            }
            None => raise(hook, format!("attempt to call a {} value", callee.type_name())),
        }
    }

    fn callable(&self, value: &Value) -> Option<Callable> {
        match value {
            Value::Function(id) => self.functions.get(id).cloned(),
            _ => None,
        }
    }

    /// Errors a host function builds itself carry no index yet; restamp
    /// them through the hook.
    fn call_host(
        &mut self,
        func: HostFn,
        args: Vec<Value>,
        hook: &mut dyn ExecutionHook,
    ) -> Result<Vec<Value>, ExecError> {
        match func(self, args) {
            Err(ExecError::Runtime(err)) if err.index.is_none() => {
                Err(hook.runtime_error(err.message).into())
            }
            other => other,
        }
    }

    /// CLOSURE is followed by one pseudo-instruction per upvalue: MOVE
    /// captures a register of this frame, GETUPVAL shares one of ours.
    /// Registers are captured by value.
    fn make_closure(
        &mut self,
        frame: FrameId,
        target: usize,
        index: i32,
        hook: &mut dyn ExecutionHook,
    ) -> Result<(), ExecError> {
        let parent = self.activation(frame).closure.clone();
        let Some(proto) = usize::try_from(index).ok().and_then(|i| parent.proto.protos.get(i)) else {
            return raise(hook, format!("prototype {} out of range", index));
        };
        let proto = Rc::new(proto.clone());

        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for _ in 0..proto.upvalues.len() {
            let pc = self.activation(frame).pc;
            let Some(capture) = parent.proto.instructions.get(pc).copied() else {
                return raise(hook, "closure capture list is truncated".to_string());
            };
            self.activation_mut(frame).pc += 1;
            let cell = match capture.op {
                MOVE => Rc::new(RefCell::new(self.reg(frame, capture.b.max(0) as usize))),
                GETUPVAL => self.upvalue_cell(frame, capture.b, hook)?,
                other => return raise(hook, format!("opcode {} cannot capture an upvalue", other)),
            };
            upvalues.push(cell);
        }

        let closure = Closure {
            proto,
            upvalues,
            file_id: parent.file_id.clone(),
        };
        let id = self.mint_function(Callable::Lua(Rc::new(closure)));
        self.set_reg(frame, target, Value::Function(id));
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        // `_G` points back at the globals table.
        self.globals.clear();
    }
}

/// Errors that collect interpreter frames while unwinding.
trait Unwinding {
    fn trace(&mut self) -> &mut Vec<StackEntry>;
}

impl Unwinding for RuntimeError {
    fn trace(&mut self) -> &mut Vec<StackEntry> {
        &mut self.stack
    }
}

impl Unwinding for HostError {
    fn trace(&mut self) -> &mut Vec<StackEntry> {
        &mut self.stack
    }
}

fn raise<T>(hook: &mut dyn ExecutionHook, message: String) -> Result<T, ExecError> {
    Err(hook.runtime_error(message).into())
}

fn arith_error<T>(hook: &mut dyn ExecutionHook, operand: &Value) -> Result<T, ExecError> {
    raise(
        hook,
        format!("attempt to perform arithmetic on a {} value", operand.type_name()),
    )
}

impl Interpreter for Vm {
    fn frame(&self, id: FrameId) -> Option<&dyn FrameView> {
        self.frames.get(&id).map(|a| a as &dyn FrameView)
    }

    fn globals(&self) -> Vec<(String, Value)> {
        self.globals.fields()
    }

    fn render_stack(&self, stack: &[StackEntry]) -> String {
        stack
            .iter()
            .map(|entry| match self.frames.get(&entry.frame) {
                Some(activation) => {
                    let proto = &activation.closure.proto;
                    format!(
                        "    at {} ({}:{})",
                        proto.display_name(),
                        activation.closure.file_id,
                        proto.line_at(entry.pc)
                    )
                }
                None => format!("    at ? (frame {})", entry.frame.0),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn run_frame(
        &mut self,
        frame: FrameId,
        hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError> {
        let mut stack = vec![frame];
        while let Some(inner) = hook.take_resume() {
            match inner {
                Resumable::Call(id) => stack.push(id),
                Resumable::Coroutine(co) => {
                    return Err(HostError::new(format!(
                        "coroutine {} cannot be resumed inside a call chain",
                        co.0
                    ))
                    .into())
                }
            }
        }
        if let Some(missing) = stack.iter().find(|id| !self.frames.contains_key(id)) {
            return Err(HostError::new(format!("frame {} is not live", missing.0)).into());
        }
        debug!(outer = frame.0, depth = stack.len(), "re-entered");
        self.run(stack, hook)
    }

    fn resume_coroutine(
        &mut self,
        coroutine: CoroutineId,
        _hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError> {
        Err(HostError::new(format!(
            "coroutine {} cannot be resumed: coroutines are not supported",
            coroutine.0
        ))
        .into())
    }

    fn call(
        &mut self,
        function: &Value,
        args: Vec<Value>,
        hook: &mut dyn ExecutionHook,
    ) -> Result<RunOutcome, ExecError> {
        match self.callable(function) {
            Some(Callable::Lua(closure)) => {
                let frame = self.push_activation(closure, args);
                self.run(vec![frame], hook)
            }
            Some(Callable::Host(func)) => {
                self.call_host(func, args, hook).map(RunOutcome::Completed)
            }
            None => raise(hook, format!("attempt to call a {} value", function.type_name())),
        }
    }
}
