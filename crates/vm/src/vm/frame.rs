use crate::gc::Gc;
use crate::value::{Closure, Function};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Function,
    /// Running a class initializer: the return value is replaced by the
    /// instance in slot 0.
    Initializer,
}

/// One active invocation of a closure.
#[derive(Debug, Clone)]
pub(crate) struct CallFrame {
    pub closure: Gc<Closure>,
    /// The function of `closure`, cached to save a lookup per instruction
    pub function: Gc<Function>,
    /// Offset of the next instruction in the function's code
    pub ip: usize,
    /// Stack index of slot 0: the callee, then the arguments and locals
    pub base: usize,
    pub kind: FrameKind,
}

impl CallFrame {
    pub fn new(closure: Gc<Closure>, function: Gc<Function>, base: usize, kind: FrameKind) -> Self {
        Self {
            closure,
            function,
            ip: 0,
            base,
            kind,
        }
    }

    /// Offset of the instruction being executed, for line lookups
    pub fn current_offset(&self) -> usize {
        self.ip.saturating_sub(1)
    }
}
