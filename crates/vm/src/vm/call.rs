//! Calls, closures and upvalue capture.

use quill_bytecode::Capture;
use smol_str::SmolStr;

use super::error::RuntimeErrorKind;
use super::frame::{CallFrame, FrameKind};
use super::{invalid, OpResult, Vm};
use crate::gc::Gc;
use crate::value::{Class, Closure, Function, Instance, Native, Obj, Upvalue, Value};

/// What a call resolves to, copied out of the heap so the heap can be
/// mutated while the call is set up.
enum Callee {
    Closure(Gc<Closure>),
    Native(Native),
    Class(Gc<Class>),
    Bound { receiver: Value, method: Gc<Closure> },
}

impl Vm {
    /// Call `callee`, which sits on the stack below its `argc` arguments.
    ///
    /// Closures get a new frame and start running on the next dispatch.
    /// Natives and classes without an initializer complete immediately,
    /// leaving their result in the callee slot.
    pub(super) fn call_value(&mut self, callee: Value, argc: usize) -> OpResult<()> {
        let resolved = callee
            .as_obj()
            .and_then(|obj| Some((obj, self.heap.obj(obj)?)))
            .and_then(|(obj, o)| match o {
                Obj::Closure(_) => Some(Callee::Closure(Gc::from_ref(obj))),
                Obj::Native(native) => Some(Callee::Native(native.clone())),
                Obj::Class(_) => Some(Callee::Class(Gc::from_ref(obj))),
                Obj::BoundMethod(bound) => Some(Callee::Bound {
                    receiver: bound.receiver,
                    method: bound.method,
                }),
                _ => None,
            });

        match resolved {
            Some(Callee::Closure(closure)) => self.call_closure(closure, argc, FrameKind::Function),
            Some(Callee::Native(native)) => self.call_native(&native, argc),
            Some(Callee::Class(class)) => self.call_class(class, argc),
            Some(Callee::Bound { receiver, method }) => {
                let slot = self.callee_slot(argc)?;
                self.stack[slot] = receiver;
                let kind = if self.is_initializer(method) {
                    FrameKind::Initializer
                } else {
                    FrameKind::Function
                };
                self.call_closure(method, argc, kind)
            }
            None => Err(RuntimeErrorKind::TypeError(format!(
                "Can only call functions and classes, got {}.",
                self.type_name(callee)
            ))),
        }
    }

    fn callee_slot(&self, argc: usize) -> OpResult<usize> {
        self.stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| invalid("call arguments missing from the stack"))
    }

    fn is_initializer(&self, method: Gc<Closure>) -> bool {
        let function = self.heap.get(self.heap.get(method).function);
        function.name == Some(self.init_string)
    }

    fn function_name(&self, function: Gc<Function>) -> SmolStr {
        match self.heap.get(function).name {
            Some(name) => self.name_of(name),
            None => SmolStr::new_inline("script"),
        }
    }

    pub(super) fn call_closure(
        &mut self,
        closure: Gc<Closure>,
        argc: usize,
        kind: FrameKind,
    ) -> OpResult<()> {
        let function = self.heap.get(closure).function;
        let arity = self.heap.get(function).arity as usize;
        if argc != arity {
            return Err(RuntimeErrorKind::ArityMismatch {
                name: self.function_name(function),
                expected: arity,
                got: argc,
            });
        }
        if self.frames.len() >= self.config.frames_max {
            return Err(RuntimeErrorKind::StackOverflow);
        }

        let base = self.callee_slot(argc)?;
        self.frames
            .push(CallFrame::new(closure, function, base, kind));
        Ok(())
    }

    fn call_native(&mut self, native: &Native, argc: usize) -> OpResult<()> {
        if argc != native.arity as usize {
            return Err(RuntimeErrorKind::ArityMismatch {
                name: native.name.clone(),
                expected: native.arity as usize,
                got: argc,
            });
        }
        let slot = self.callee_slot(argc)?;
        let result = (native.function)(&self.stack[slot + 1..]).map_err(RuntimeErrorKind::Native)?;
        self.stack.truncate(slot);
        self.push(result)
    }

    fn call_class(&mut self, class: Gc<Class>, argc: usize) -> OpResult<()> {
        let slot = self.callee_slot(argc)?;
        // the class stays in the callee slot until the instance replaces it
        let instance = self.alloc(Instance::new(class));
        self.stack[slot] = instance.into();

        let init = self.heap.get(class).methods.get(&self.init_string).copied();
        match init {
            Some(init) => self.call_closure(init, argc, FrameKind::Initializer),
            None if argc != 0 => Err(RuntimeErrorKind::ArityMismatch {
                name: self.name_of(self.heap.get(class).name),
                expected: 0,
                got: argc,
            }),
            None => {
                self.stack.truncate(slot + 1);
                Ok(())
            }
        }
    }

    pub(super) fn op_closure(&mut self, operand: u32) -> OpResult<()> {
        let function = self
            .read_constant(operand)?
            .as_obj()
            .and_then(|obj| self.heap.downcast::<Function>(obj))
            .ok_or_else(|| invalid("closure operand is not a function"))?;
        let captures = self.heap.get(function).captures.clone();
        let base = self.frame()?.base;

        // fresh upvalues are rooted through `open_upvalues` as soon as they
        // are created, inherited ones through the running closure
        let mut upvalues = Vec::with_capacity(captures.len());
        for capture in captures.iter() {
            let upvalue = match *capture {
                Capture::Local(slot) => self.capture_upvalue(base + slot as usize)?,
                Capture::Upvalue(idx) => self.upvalue(idx as u32)?,
            };
            upvalues.push(upvalue);
        }

        let closure = self.alloc(Closure {
            function,
            upvalues: upvalues.into(),
        });
        self.push(closure.into())
    }

    /// Find or create the open upvalue for stack slot `slot`. At most one
    /// open upvalue exists per slot, so closures capturing the same variable
    /// share it.
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> OpResult<Gc<Upvalue>> {
        if slot >= self.stack.len() {
            return Err(invalid("captured slot past stack top"));
        }
        match self
            .open_upvalues
            .binary_search_by_key(&slot, |(s, _)| *s)
        {
            Ok(idx) => Ok(self.open_upvalues[idx].1),
            Err(idx) => {
                let upvalue = self.alloc(Upvalue::Open(slot));
                self.open_upvalues.insert(idx, (slot, upvalue));
                Ok(upvalue)
            }
        }
    }

    /// Close every open upvalue at or above stack slot `from`, moving the
    /// current slot value into the upvalue.
    pub(super) fn close_upvalues(&mut self, from: usize) {
        let split = self.open_upvalues.partition_point(|(slot, _)| *slot < from);
        for (slot, upvalue) in self.open_upvalues.drain(split..) {
            // malformed code may already have popped the slot
            let value = self.stack.get(slot).copied().unwrap_or_default();
            *self.heap.get_mut(upvalue) = Upvalue::Closed(value);
        }
    }
}
