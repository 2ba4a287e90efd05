use std::borrow::Cow;
use std::fmt::Display;

use itertools::Itertools;
use smol_str::SmolStr;

/// Failure reported by an external compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub message: Cow<'static, str>,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<Cow<'static, str>>) -> CompileError {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    ArityMismatch {
        name: SmolStr,
        expected: usize,
        got: usize,
    },
    /// An operation got operands of the wrong type
    TypeError(String),
    UndefinedVariable(SmolStr),
    UndefinedProperty(SmolStr),
    StackOverflow,
    /// A native function reported failure
    Native(String),
    /// Writing to the VM output failed
    Io(String),
    /// The bytecode does not decode, or refers to constants, slots or
    /// upvalues that do not exist
    InvalidBytecode(Cow<'static, str>),
}

impl Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeErrorKind::ArityMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "Expected {} arguments but got {} when calling '{}'.",
                expected, got, name
            ),
            RuntimeErrorKind::TypeError(msg) => f.write_str(msg),
            RuntimeErrorKind::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeErrorKind::UndefinedProperty(name) => {
                write!(f, "Undefined property '{}'.", name)
            }
            RuntimeErrorKind::StackOverflow => f.write_str("Stack overflow."),
            RuntimeErrorKind::Native(msg) => f.write_str(msg),
            RuntimeErrorKind::Io(msg) => write!(f, "Failed to write output: {}", msg),
            RuntimeErrorKind::InvalidBytecode(msg) => write!(f, "Invalid bytecode: {}", msg),
        }
    }
}

/// One active call at the time of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: u32,
    /// `None` for the top-level script
    pub function: Option<SmolStr>,
}

impl Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Line of the instruction that failed
    pub line: u32,
    /// Active calls, innermost first
    pub trace: Vec<TraceEntry>,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.trace.is_empty() {
            write!(f, "\n{}", self.trace.iter().join("\n"))?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Outcome of [`Vm::interpret`](crate::vm::Vm::interpret).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl InterpretResult {
    /// Process exit code for this outcome, following `sysexits.h`.
    pub fn exit_code(self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError => 65,
            InterpretResult::RuntimeError => 70,
        }
    }
}
