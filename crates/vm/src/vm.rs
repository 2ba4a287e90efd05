mod call;
pub mod error;
mod frame;
mod native;

use std::borrow::Cow;
use std::io::Write;

use fnv::FnvHashMap;
use itertools::Itertools;
use quill_bytecode::disasm::disassemble_instruction;
use quill_bytecode::inst::{Inst, InstContainer, InstReader};
use quill_bytecode::{Constant, FunctionProto};

use self::error::{CompileError, InterpretResult, RuntimeError, RuntimeErrorKind, TraceEntry};
use self::frame::{CallFrame, FrameKind};
use crate::config::VmConfig;
use crate::gc::{Gc, GcStats, Heap, ObjRef, Trace, Tracer};
use crate::value::{
    field_entry_size, method_entry_size, BoundMethod, Class, Closure, Function, HeapKind, Instance,
    LoxString, Native, NativeFn, Upvalue, Value,
};

pub(crate) type OpResult<T> = Result<T, RuntimeErrorKind>;

/// The compiler collaborator: turns source text into a compiled unit.
pub trait Compile {
    fn compile(&mut self, source: &str) -> Result<FunctionProto, CompileError>;
}

/// The virtual machine: value stack, call frames, globals and the heap.
pub struct Vm {
    config: VmConfig,
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: FnvHashMap<Gc<LoxString>, Value>,
    /// Upvalues still pointing into the stack, sorted by slot
    open_upvalues: Vec<(usize, Gc<Upvalue>)>,
    /// Objects under construction that no other root reaches yet
    pinned: Vec<ObjRef>,
    init_string: Gc<LoxString>,
    output: Box<dyn Write>,
    last_error: Option<RuntimeError>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Vm {
        let mut heap = Heap::new(&config);
        let init_string = heap.intern("init");
        let mut vm = Vm {
            stack: Vec::with_capacity(config.stack_max.min(1024)),
            frames: Vec::with_capacity(config.frames_max),
            config,
            heap,
            globals: FnvHashMap::default(),
            open_upvalues: Vec::new(),
            pinned: Vec::new(),
            init_string,
            output: Box::new(std::io::stdout()),
            last_error: None,
        };
        for &(name, arity, function) in native::BUILTINS {
            vm.define_native(name, arity, function);
        }
        vm
    }

    /// Redirect the output of `Print`.
    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = output;
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Number of values currently on the value stack
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Number of active call frames
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.last_error.as_ref()
    }

    /// Look up a global without allocating.
    pub fn global(&self, name: &str) -> Option<Value> {
        let name = self.heap.find_string(name)?;
        self.globals.get(&name).copied()
    }

    /// Display form of a value
    pub fn display(&self, value: Value) -> String {
        value.display(&self.heap).to_string()
    }

    /// The string content of a value, if it is a string.
    pub fn as_str(&self, value: Value) -> Option<&str> {
        let s = self.heap.downcast::<LoxString>(value.as_obj()?)?;
        Some(self.heap.get(s).as_str())
    }

    /// Register a host function as a global.
    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let name_str = self.intern(name);
        self.pinned.push(name_str.into());
        let native = self.alloc(Native {
            name: name.into(),
            arity,
            function,
        });
        self.pinned.pop();
        self.globals.insert(name_str, native.into());
    }

    /// Return the canonical string object for `s`, allocating it if needed.
    pub fn intern(&mut self, s: &str) -> Gc<LoxString> {
        if let Some(existing) = self.heap.find_string(s) {
            return existing;
        }
        if self
            .heap
            .should_collect(std::mem::size_of::<LoxString>() + s.len())
        {
            self.collect_with(None);
        }
        self.heap.intern(s)
    }

    /// Move an object into the heap, collecting first if the heap has grown
    /// enough. `value` itself is traced as a root during that collection, so
    /// whatever it references survives.
    pub(crate) fn alloc<T: HeapKind>(&mut self, value: T) -> Gc<T> {
        if self.heap.should_collect(std::mem::size_of::<T>()) {
            self.collect_with(Some(&value));
        }
        self.heap.insert(value)
    }

    /// Run a full collection now.
    pub fn collect_garbage(&mut self) {
        self.collect_with(None)
    }

    fn collect_with(&mut self, pending: Option<&dyn Trace>) {
        let before = self.heap.bytes_allocated();
        tracing::debug!(bytes = before, objects = self.heap.len(), "gc begin");

        let mut tracer = Tracer::new();
        self.trace_roots(&mut tracer);
        if let Some(pending) = pending {
            pending.trace(&mut tracer);
        }
        let cycle = self.heap.collect(tracer);

        tracing::debug!(
            freed = cycle.objects_freed,
            bytes_freed = cycle.bytes_freed,
            bytes = cycle.bytes_after,
            next_gc = self.heap.next_gc(),
            "gc end"
        );
    }

    fn trace_roots(&self, tracer: &mut Tracer) {
        for value in &self.stack {
            tracer.mark_value(value);
        }
        for frame in &self.frames {
            tracer.mark(frame.closure);
        }
        for (_, upvalue) in &self.open_upvalues {
            tracer.mark(*upvalue);
        }
        for (name, value) in &self.globals {
            tracer.mark(*name);
            tracer.mark_value(value);
        }
        for obj in &self.pinned {
            tracer.mark(*obj);
        }
        tracer.mark(self.init_string);
    }

    /// Materialize a compiled unit into heap objects.
    ///
    /// The returned function stays pinned until [`Self::run_function`] takes
    /// it over, so allocations in between cannot free it.
    pub fn load(&mut self, proto: &FunctionProto) -> Gc<Function> {
        let mark = self.pinned.len();
        let function = self.load_nested(proto);
        self.pinned.truncate(mark);
        self.pinned.push(function.into());
        function
    }

    fn unpin(&mut self, obj: ObjRef) {
        if let Some(pos) = self.pinned.iter().rposition(|p| *p == obj) {
            self.pinned.remove(pos);
        }
    }

    fn load_nested(&mut self, proto: &FunctionProto) -> Gc<Function> {
        let name = proto.name.as_ref().map(|name| {
            let name = self.intern(name);
            self.pinned.push(name.into());
            name
        });

        let mut constants = Vec::with_capacity(proto.chunk.constants.len());
        for constant in &proto.chunk.constants {
            let value = match constant {
                Constant::Number(n) => Value::Number(*n),
                Constant::String(s) => self.intern(s).into(),
                Constant::Function(nested) => self.load_nested(nested).into(),
            };
            if let Value::Obj(obj) = value {
                self.pinned.push(obj);
            }
            constants.push(value);
        }

        self.alloc(Function {
            name,
            arity: proto.arity,
            captures: proto.captures.clone().into(),
            code: proto.chunk.code.clone().into(),
            lines: proto.chunk.lines.clone().into(),
            constants: constants.into(),
        })
    }

    /// Compile and run `source`.
    pub fn interpret(&mut self, source: &str, compiler: &mut dyn Compile) -> InterpretResult {
        self.last_error = None;
        let proto = match compiler.compile(source) {
            Ok(proto) => proto,
            Err(e) => {
                tracing::error!("{}", e);
                return InterpretResult::CompileError;
            }
        };
        match self.run_proto(&proto) {
            Ok(_) => InterpretResult::Ok,
            Err(e) => {
                tracing::error!("{}", e);
                self.last_error = Some(e);
                InterpretResult::RuntimeError
            }
        }
    }

    /// Load a compiled unit and run it to completion. Returns the value of
    /// its top-level `Return`.
    pub fn run_proto(&mut self, proto: &FunctionProto) -> Result<Value, RuntimeError> {
        let function = self.load(proto);
        self.run_function(function)
    }

    /// Wrap a loaded function in a closure without upvalues and run it.
    pub fn run_function(&mut self, function: Gc<Function>) -> Result<Value, RuntimeError> {
        let closure = self.alloc(Closure {
            function,
            upvalues: Box::new([]),
        });
        // the closure reaches the function from here on, and `call` roots
        // the closure before anything else allocates
        self.unpin(function.into());
        self.call(closure.into(), &[])
    }

    /// Call any callable value from the host and run it to completion.
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let depth = self.frames.len();
        let result = self.call_and_run(callee, args, depth);
        result.map_err(|kind| {
            let err = self.runtime_error(kind);
            self.reset();
            err
        })
    }

    fn call_and_run(&mut self, callee: Value, args: &[Value], depth: usize) -> OpResult<Value> {
        self.push(callee)?;
        for arg in args {
            self.push(*arg)?;
        }
        self.call_value(callee, args.len())?;
        if self.frames.len() > depth {
            self.run(depth)
        } else {
            // natives and classes without initializer finish right away
            self.pop()
        }
    }

    /// Drop all execution state after an error. Closures that escaped into
    /// globals keep the values they captured. Pins belong to loads that have
    /// not run yet and survive.
    fn reset(&mut self) {
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
    }

    fn runtime_error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.get(frame.function);
                TraceEntry {
                    line: function
                        .lines
                        .get(frame.current_offset())
                        .copied()
                        .unwrap_or(0),
                    function: function
                        .name
                        .map(|name| self.heap.get(name).as_str().into()),
                }
            })
            .collect_vec();
        RuntimeError {
            line: trace.first().map_or(0, |entry| entry.line),
            kind,
            trace,
        }
    }

    fn push(&mut self, value: Value) -> OpResult<()> {
        if self.stack.len() >= self.config.stack_max {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> OpResult<Value> {
        self.stack.pop().ok_or_else(|| invalid("stack underflow"))
    }

    fn peek(&self, distance: usize) -> OpResult<Value> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .map(|idx| self.stack[idx])
            .ok_or_else(|| invalid("stack underflow"))
    }

    fn frame(&self) -> OpResult<&CallFrame> {
        self.frames.last().ok_or_else(|| invalid("no active frame"))
    }

    fn frame_mut(&mut self) -> OpResult<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| invalid("no active frame"))
    }

    /// Decode the next instruction of the current frame and advance past it.
    fn fetch(&mut self) -> OpResult<(Inst, u32)> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| invalid("no active frame"))?;
        let function = self.heap.get(frame.function);
        let mut reader = InstReader::at(&function.code, frame.ip);
        let inst = match reader.read_inst() {
            Some(Ok(inst)) => inst,
            Some(Err(byte)) => {
                return Err(RuntimeErrorKind::InvalidBytecode(
                    format!("unknown opcode {}", byte).into(),
                ))
            }
            None => return Err(invalid("ran past the end of the code")),
        };
        let operand = match inst.param_type() {
            Some(ty) => reader
                .read_operand(ty)
                .ok_or_else(|| invalid("truncated operand"))?,
            None => 0,
        };
        frame.ip = reader.position();
        Ok((inst, operand))
    }

    fn read_constant(&self, idx: u32) -> OpResult<Value> {
        let function = self.heap.get(self.frame()?.function);
        function
            .constants
            .get(idx as usize)
            .copied()
            .ok_or_else(|| invalid("constant index out of range"))
    }

    fn read_string(&self, idx: u32) -> OpResult<Gc<LoxString>> {
        self.read_constant(idx)?
            .as_obj()
            .and_then(|obj| self.heap.downcast(obj))
            .ok_or_else(|| invalid("expected a string constant"))
    }

    fn name_of(&self, name: Gc<LoxString>) -> smol_str::SmolStr {
        self.heap.get(name).as_str().into()
    }

    fn type_name(&self, value: Value) -> &'static str {
        value.type_name(&self.heap)
    }

    fn trace_instruction(&self) {
        let frame = match self.frames.last() {
            Some(frame) => frame,
            None => return,
        };
        let function = self.heap.get(frame.function);
        let stack = self
            .stack
            .iter()
            .map(|v| format!("[ {} ]", v.display(&self.heap)))
            .join("");
        let (inst, _) = disassemble_instruction(&function.code, &function.lines, frame.ip, |idx| {
            function
                .constants
                .get(idx)
                .map(|c| c.display(&self.heap).to_string())
        });
        tracing::trace!(target: "quill_vm::exec", "          {}\n{}", stack, inst);
    }

    /// Execute until the frame count drops back to `exit_depth`, returning
    /// the value returned by the frame that got it there.
    fn run(&mut self, exit_depth: usize) -> OpResult<Value> {
        loop {
            if self.config.trace_execution {
                self.trace_instruction();
            }

            let (inst, operand) = self.fetch()?;
            match inst {
                Inst::Constant => {
                    let value = self.read_constant(operand)?;
                    self.push(value)?;
                }
                Inst::Nil => self.push(Value::Nil)?,
                Inst::True => self.push(Value::Bool(true))?,
                Inst::False => self.push(Value::Bool(false))?,
                Inst::Pop => {
                    self.pop()?;
                }

                Inst::GetLocal => {
                    let slot = self.local_slot(operand)?;
                    self.push(self.stack[slot])?;
                }
                Inst::SetLocal => {
                    let slot = self.local_slot(operand)?;
                    self.stack[slot] = self.peek(0)?;
                }
                Inst::GetGlobal => {
                    let name = self.read_string(operand)?;
                    match self.globals.get(&name) {
                        Some(&value) => self.push(value)?,
                        None => {
                            return Err(RuntimeErrorKind::UndefinedVariable(self.name_of(name)))
                        }
                    }
                }
                Inst::DefineGlobal => {
                    let name = self.read_string(operand)?;
                    let value = self.peek(0)?;
                    self.globals.insert(name, value);
                    self.pop()?;
                }
                Inst::SetGlobal => {
                    let name = self.read_string(operand)?;
                    let value = self.peek(0)?;
                    match self.globals.get_mut(&name) {
                        Some(slot) => *slot = value,
                        None => {
                            return Err(RuntimeErrorKind::UndefinedVariable(self.name_of(name)))
                        }
                    }
                }

                Inst::GetUpvalue => {
                    let upvalue = self.upvalue(operand)?;
                    let value = match *self.heap.get(upvalue) {
                        Upvalue::Open(slot) => self.stack_slot(slot)?,
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value)?;
                }
                Inst::SetUpvalue => {
                    let upvalue = self.upvalue(operand)?;
                    let value = self.peek(0)?;
                    match self.heap.get_mut(upvalue) {
                        Upvalue::Open(slot) => {
                            let slot = *slot;
                            *self
                                .stack
                                .get_mut(slot)
                                .ok_or_else(|| invalid("open upvalue past stack top"))? = value;
                        }
                        Upvalue::Closed(closed) => *closed = value,
                    }
                }

                Inst::GetProperty => self.op_get_property(operand)?,
                Inst::SetProperty => self.op_set_property(operand)?,

                Inst::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                Inst::Greater => self.binary_number(|a, b| Value::Bool(a > b))?,
                Inst::Less => self.binary_number(|a, b| Value::Bool(a < b))?,
                Inst::Add => self.op_add()?,
                Inst::Subtract => self.binary_number(|a, b| Value::Number(a - b))?,
                Inst::Multiply => self.binary_number(|a, b| Value::Number(a * b))?,
                Inst::Divide => self.binary_number(|a, b| Value::Number(a / b))?,
                Inst::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                Inst::Negate => match self.peek(0)? {
                    Value::Number(n) => {
                        self.pop()?;
                        self.push(Value::Number(-n))?;
                    }
                    other => {
                        return Err(RuntimeErrorKind::TypeError(format!(
                            "Operand must be a number, got {}.",
                            self.type_name(other)
                        )))
                    }
                },
                Inst::Print => {
                    let value = self.pop()?;
                    writeln!(self.output, "{}", value.display(&self.heap))
                        .map_err(|e| RuntimeErrorKind::Io(e.to_string()))?;
                }

                Inst::Jump => self.frame_mut()?.ip += operand as usize,
                Inst::JumpIfFalse => {
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut()?.ip += operand as usize;
                    }
                }
                Inst::Loop => {
                    let frame = self.frame_mut()?;
                    frame.ip = frame
                        .ip
                        .checked_sub(operand as usize)
                        .ok_or_else(|| invalid("loop before start of code"))?;
                }

                Inst::Call => {
                    let argc = operand as usize;
                    let callee = self.peek(argc)?;
                    self.call_value(callee, argc)?;
                }
                Inst::Closure => self.op_closure(operand)?,
                Inst::CloseUpvalue => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or_else(|| invalid("stack underflow"))?;
                    self.close_upvalues(top);
                    self.pop()?;
                }
                Inst::Return => {
                    let result = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| invalid("no active frame"))?;
                    self.close_upvalues(frame.base);
                    let result = match frame.kind {
                        FrameKind::Function => result,
                        FrameKind::Initializer => self.stack_slot(frame.base)?,
                    };
                    self.stack.truncate(frame.base);
                    if self.frames.len() <= exit_depth {
                        return Ok(result);
                    }
                    self.push(result)?;
                }

                Inst::Class => {
                    let name = self.read_string(operand)?;
                    let class = self.alloc(Class::new(name));
                    self.push(class.into())?;
                }
                Inst::Method => self.op_method(operand)?,
            }
        }
    }

    fn stack_slot(&self, slot: usize) -> OpResult<Value> {
        self.stack
            .get(slot)
            .copied()
            .ok_or_else(|| invalid("stack slot out of range"))
    }

    fn local_slot(&self, operand: u32) -> OpResult<usize> {
        let slot = self.frame()?.base + operand as usize;
        if slot < self.stack.len() {
            Ok(slot)
        } else {
            Err(invalid("local slot out of range"))
        }
    }

    fn upvalue(&self, operand: u32) -> OpResult<Gc<Upvalue>> {
        let closure = self.heap.get(self.frame()?.closure);
        closure
            .upvalues
            .get(operand as usize)
            .copied()
            .ok_or_else(|| invalid("upvalue index out of range"))
    }

    fn binary_number(&mut self, op: fn(f64, f64) -> Value) -> OpResult<()> {
        match (self.peek(1)?, self.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(op(a, b))
            }
            (a, b) => Err(RuntimeErrorKind::TypeError(format!(
                "Operands must be numbers, got {} and {}.",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    fn op_add(&mut self) -> OpResult<()> {
        let (a, b) = (self.peek(1)?, self.peek(0)?);
        if let (Value::Number(a), Value::Number(b)) = (a, b) {
            self.pop()?;
            self.pop()?;
            return self.push(Value::Number(a + b));
        }
        match (self.as_str(a), self.as_str(b)) {
            (Some(lhs), Some(rhs)) => {
                let joined = [lhs, rhs].concat();
                // operands stay on the stack until the result exists
                let result = self.intern(&joined);
                self.pop()?;
                self.pop()?;
                self.push(result.into())
            }
            _ => Err(RuntimeErrorKind::TypeError(format!(
                "Operands must be two numbers or two strings, got {} and {}.",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    fn instance_of(&self, value: Value, what: &str) -> OpResult<Gc<Instance>> {
        value
            .as_obj()
            .and_then(|obj| self.heap.downcast(obj))
            .ok_or_else(|| {
                RuntimeErrorKind::TypeError(format!(
                    "Only instances have {}, got {}.",
                    what,
                    self.type_name(value)
                ))
            })
    }

    fn op_get_property(&mut self, operand: u32) -> OpResult<()> {
        let name = self.read_string(operand)?;
        let receiver = self.peek(0)?;
        let instance = self.instance_of(receiver, "properties")?;

        let instance_ref = self.heap.get(instance);
        if let Some(&value) = instance_ref.fields.get(&name) {
            self.pop()?;
            return self.push(value);
        }

        let class = instance_ref.class;
        let method = match self.heap.get(class).methods.get(&name) {
            Some(&method) => method,
            None => return Err(RuntimeErrorKind::UndefinedProperty(self.name_of(name))),
        };
        // the receiver stays on the stack while the bound method is allocated
        let bound = self.alloc(BoundMethod { receiver, method });
        self.pop()?;
        self.push(bound.into())
    }

    fn op_set_property(&mut self, operand: u32) -> OpResult<()> {
        let name = self.read_string(operand)?;
        let value = self.peek(0)?;
        let instance = self.instance_of(self.peek(1)?, "fields")?;

        let is_new = self
            .heap
            .get_mut(instance)
            .fields
            .insert(name, value)
            .is_none();
        if is_new {
            self.heap.grow(instance, field_entry_size());
        }

        self.pop()?;
        self.pop()?;
        self.push(value)?;
        if self.heap.should_collect(0) {
            self.collect_with(None);
        }
        Ok(())
    }

    fn op_method(&mut self, operand: u32) -> OpResult<()> {
        let name = self.read_string(operand)?;
        let method = self
            .peek(0)?
            .as_obj()
            .and_then(|obj| self.heap.downcast::<Closure>(obj))
            .ok_or_else(|| invalid("method body is not a closure"))?;
        let class = self
            .peek(1)?
            .as_obj()
            .and_then(|obj| self.heap.downcast::<Class>(obj))
            .ok_or_else(|| invalid("method defined outside a class"))?;

        if self
            .heap
            .get_mut(class)
            .methods
            .insert(name, method)
            .is_none()
        {
            self.heap.grow(class, method_entry_size());
        }
        self.pop()?;
        if self.heap.should_collect(0) {
            self.collect_with(None);
        }
        Ok(())
    }
}

fn invalid(msg: &'static str) -> RuntimeErrorKind {
    RuntimeErrorKind::InvalidBytecode(Cow::Borrowed(msg))
}
