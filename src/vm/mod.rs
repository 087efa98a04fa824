//! The stack-based bytecode interpreter.

use std::collections::HashMap;
use std::rc::Rc;

use crate::common::opcode::Opcode;
use crate::common::value::{FunctionObj, Object, Value};
use crate::compiler::Compiler;

/// Value stack capacity: 64 frames deep, 256 slots per frame.
pub const STACK_CAPACITY: usize = 64 * 256;
/// Call-frame stack capacity.
pub const CALL_FRAME_CAPACITY: usize = 64;
/// Initial capacity of the object tracking list; it grows past this as
/// needed, this is only a hint sized after the reference implementation.
pub const OBJECT_CAPACITY: usize = 256;

/// A captured runtime error: enough context to render a diagnostic pointing
/// back at the offending source line.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub msg: String,
    pub source_line: String,
    pub file: String,
    pub function_name: String,
    pub line: u32,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "thread 'main' panicked at: '{}'", self.source_line)?;
        write!(
            f,
            "{}:{}:{} Runtime Error: {}",
            self.file, self.line, self.function_name, self.msg
        )
    }
}

/// The result of running a program to completion.
#[derive(Debug)]
pub enum InterpretResult {
    Ok,
    CompileError(String),
    RuntimeError(RuntimeError),
}

/// One in-progress function activation.
struct CallFrame {
    function: Rc<FunctionObj>,
    ip: usize,
    slot_base: usize,
}

/// Owns the value stack, the call-frame stack, the globals table, and the
/// object tracking list. One VM per file run; the REPL reuses a single VM
/// across lines so that globals persist between them.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    /// Append-only. Objects are actually freed by `Rc` reference counting
    /// once both this list and the stack drop their handles; this list is
    /// kept only as a semantic echo of the tracked-allocation design it is
    /// grounded on, and must never be treated as a second value stack.
    objects: Vec<Rc<Object>>,
    last_error: Option<RuntimeError>,
    /// The filename of the program currently loaded via `run_code`, quoted
    /// in runtime error diagnostics. Updated on every `run_code` call so the
    /// REPL's per-line "stdin" pseudo-filename and a file run's real path
    /// both render correctly.
    file: String,
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            stack: Vec::with_capacity(STACK_CAPACITY),
            frames: Vec::with_capacity(CALL_FRAME_CAPACITY),
            globals: HashMap::new(),
            objects: Vec::with_capacity(OBJECT_CAPACITY),
            last_error: None,
            file: String::new(),
        }
    }

    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.last_error.as_ref()
    }

    fn track(&mut self, obj: Rc<Object>) {
        self.objects.push(obj);
    }

    /// Compiles `source` and, on success, runs it to completion.
    pub fn run_code(&mut self, file: &str, source: &str) -> InterpretResult {
        log::debug!("run_code: {}", file);
        self.file = file.to_string();
        let function = match Compiler::compile(file, source) {
            Ok(f) => f,
            Err(msg) => return InterpretResult::CompileError(msg),
        };

        let function = Rc::new(function);
        // Slot 0 on the value stack is reserved for the function itself.
        let value = Value::Obj(Rc::new(Object::Function((*function).clone())));
        self.stack.push(value);
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slot_base: 0,
        });

        self.interpret()
    }

    fn runtime_error(&mut self, msg: impl Into<String>) -> InterpretResult {
        let frame = self
            .frames
            .last()
            .expect("runtime_error called with an active frame");
        let line = frame.function.block.line_at(frame.ip.saturating_sub(1));
        let source_line = frame
            .function
            .block
            .source_lines
            .get((line as usize).saturating_sub(1))
            .cloned()
            .unwrap_or_default();
        let err = RuntimeError {
            msg: msg.into(),
            source_line,
            file: self.file.clone(),
            function_name: frame.function.display_name().to_string(),
            line,
        };
        log::debug!("runtime error: {}", err.msg);
        self.last_error = Some(err.clone());
        self.stack.clear();
        self.frames.clear();
        InterpretResult::RuntimeError(err)
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("active frame");
        let byte = frame.function.block.bytes[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        let frame = self.frames.last().expect("active frame");
        frame.function.block.constants[idx as usize].clone()
    }

    fn push(&mut self, value: Value) {
        if value.is_object() {
            if let Value::Obj(obj) = &value {
                self.track(Rc::clone(obj));
            }
        }
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    /// The main dispatch loop: one iteration per bytecode instruction.
    fn interpret(&mut self) -> InterpretResult {
        loop {
            #[cfg(feature = "debug_trace")]
            {
                log::trace!("stack: {:?}", self.stack.iter().map(|v| v.to_string()).collect::<Vec<_>>());
            }

            let byte = self.read_byte();
            let op = match Opcode::from_byte(byte) {
                Some(op) => op,
                None => return self.runtime_error(format!("unimplemented opcode {}", byte)),
            };

            match op {
                Opcode::PushConstant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Null => self.push(Value::Null),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Opcode::Greater => {
                    if let Some(err) = self.check_numeric_binary() {
                        return err;
                    }
                    let b = self.pop();
                    let a = self.pop();
                    let (a, b) = (number(&a), number(&b));
                    self.push(Value::Bool(a > b));
                }
                Opcode::Less => {
                    if let Some(err) = self.check_numeric_binary() {
                        return err;
                    }
                    let b = self.pop();
                    let a = self.pop();
                    let (a, b) = (number(&a), number(&b));
                    self.push(Value::Bool(a < b));
                }
                Opcode::Add => match self.add() {
                    Ok(()) => {}
                    Err(result) => return result,
                },
                Opcode::Sub => {
                    if let Some(err) = self.check_numeric_binary() {
                        return err;
                    }
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Number(number(&a) - number(&b)));
                }
                Opcode::Mul => {
                    if let Some(err) = self.check_numeric_binary() {
                        return err;
                    }
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Number(number(&a) * number(&b)));
                }
                Opcode::Div => {
                    if let Some(err) = self.check_numeric_binary() {
                        return err;
                    }
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Number(number(&a) / number(&b)));
                }
                Opcode::Negate => {
                    if !self.peek(0).is_number() {
                        return self.runtime_error(format!(
                            "type mismatch: cannot negate a {}",
                            self.peek(0).type_name()
                        ));
                    }
                    let value = self.pop();
                    self.push(Value::Number(-number(&value)));
                }
                Opcode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Opcode::Jmp => {
                    let offset = self.read_short();
                    let frame = self.frames.last_mut().expect("active frame");
                    frame.ip += offset as usize;
                }
                Opcode::Jz => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        let frame = self.frames.last_mut().expect("active frame");
                        frame.ip += offset as usize;
                    }
                }
                Opcode::Loop => {
                    let offset = self.read_short();
                    let frame = self.frames.last_mut().expect("active frame");
                    frame.ip -= offset as usize;
                }
                Opcode::DefineGlobal => {
                    let name = self.read_constant();
                    let name = name.as_string().expect("constant for DefineGlobal is a string").to_string();
                    if self.globals.contains_key(&name) {
                        return self.runtime_error(format!("multiple definitions of '{}'", name));
                    }
                    let value = self.pop();
                    self.globals.insert(name, value);
                }
                Opcode::GetGlobal => {
                    let name = self.read_constant();
                    let name = name.as_string().expect("constant for GetGlobal is a string").to_string();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => return self.runtime_error(format!("undefined variable '{}'", name)),
                    }
                }
                Opcode::SetGlobal => {
                    let name = self.read_constant();
                    let name = name.as_string().expect("constant for SetGlobal is a string").to_string();
                    if !self.globals.contains_key(&name) {
                        return self.runtime_error(format!("undefined variable '{}'", name));
                    }
                    let value = self.peek(0).clone();
                    self.globals.insert(name, value);
                }
                Opcode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("active frame").slot_base;
                    let value = self.stack[base + slot].clone();
                    self.push(value);
                }
                Opcode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("active frame").slot_base;
                    self.stack[base + slot] = self.peek(0).clone();
                }
                Opcode::Print => {
                    let value = self.pop();
                    println!("{}", value);
                }
                Opcode::Return => {
                    self.frames.pop();
                    if self.frames.is_empty() {
                        return InterpretResult::Ok;
                    }
                }
            }
        }
    }

    fn check_numeric_binary(&mut self) -> Option<InterpretResult> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            let (a, b) = (self.peek(1).type_name(), self.peek(0).type_name());
            return Some(self.runtime_error(format!(
                "type mismatch: expected two numbers, got {} and {}",
                a, b
            )));
        }
        None
    }

    /// `Add` on a String left operand concatenates; otherwise it is numeric
    /// addition. Any other combination is a type mismatch.
    fn add(&mut self) -> Result<(), InterpretResult> {
        if self.peek(1).as_string().is_some() {
            let b = self.pop();
            let a = self.pop();
            let left = a.as_string().expect("checked above").to_string();
            let appended = match &b {
                Value::Obj(obj) => match obj.as_ref() {
                    Object::String(s) => Some(s.clone()),
                    _ => None,
                },
                Value::Char(c) => Some(c.to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
            return match appended {
                Some(suffix) => {
                    self.push(Value::string(left + &suffix));
                    Ok(())
                }
                None => Err(self.runtime_error(format!(
                    "type mismatch: cannot concatenate String with {}",
                    b.type_name()
                ))),
            };
        }

        if self.peek(0).is_number() && self.peek(1).is_number() {
            let b = self.pop();
            let a = self.pop();
            self.push(Value::Number(number(&a) + number(&b)));
            return Ok(());
        }

        let (a, b) = (self.peek(1).type_name(), self.peek(0).type_name());
        Err(self.runtime_error(format!(
            "type mismatch: cannot add {} and {}",
            a, b
        )))
    }
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        _ => panic!("number() called on a non-Number value; caller must check first"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> InterpretResult {
        let mut vm = Vm::new();
        vm.run_code("test", src)
    }

    #[test]
    fn arithmetic_precedence() {
        let result = run("print 1 + 2 * 3;");
        assert!(matches!(result, InterpretResult::Ok));
    }

    #[test]
    fn block_scoping_shadows_and_restores() {
        let result = run("let x = 10; { let x = 20; print x; } print x;");
        assert!(matches!(result, InterpretResult::Ok));
    }

    #[test]
    fn while_loop_runs_to_completion() {
        let result = run("let i = 0; while i < 3 { print i; i = i + 1; }");
        assert!(matches!(result, InterpretResult::Ok));
    }

    #[test]
    fn string_concatenation() {
        let result = run("print \"foo\" + \"bar\";");
        assert!(matches!(result, InterpretResult::Ok));
    }

    #[test]
    fn undefined_global_get_is_runtime_error() {
        let result = run("print x;");
        match result {
            InterpretResult::RuntimeError(err) => assert!(err.msg.contains("undefined variable")),
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn undefined_global_set_is_runtime_error() {
        let result = run("x = 1;");
        match result {
            InterpretResult::RuntimeError(err) => assert!(err.msg.contains("undefined variable")),
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn short_circuit_and_skips_right_side() {
        // if short-circuiting were broken, the undefined-global read of
        // `never_defined` would surface as a runtime error.
        let result = run("print false && never_defined;");
        assert!(matches!(result, InterpretResult::Ok));
    }

    #[test]
    fn short_circuit_or_skips_right_side() {
        let result = run("print true || never_defined;");
        assert!(matches!(result, InterpretResult::Ok));
    }

    #[test]
    fn type_mismatch_on_negate_is_runtime_error() {
        let result = run("print -\"x\";");
        match result {
            InterpretResult::RuntimeError(err) => assert!(err.msg.contains("type mismatch")),
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }
}
