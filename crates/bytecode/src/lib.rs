//! The compiled-unit artifact of quill: instruction set, chunks and function
//! prototypes, as produced by a compiler and consumed by `quill-vm`.

use std::fmt::Display;
use std::sync::Arc;

use smol_str::SmolStr;

pub mod chunk;
pub mod disasm;
pub mod inst;

#[cfg(test)]
mod test;

pub use chunk::{Chunk, ChunkError};

/// A compiled function literal, before it is loaded into a VM heap.
#[derive(Debug, Clone, Default)]
pub struct FunctionProto {
    /// `None` for the top-level script
    pub name: Option<SmolStr>,
    pub arity: u8,
    /// Where each captured variable comes from, in upvalue index order
    pub captures: Vec<Capture>,
    pub chunk: Chunk,
}

impl FunctionProto {
    pub fn new(name: Option<SmolStr>, arity: u8) -> Self {
        FunctionProto {
            name,
            arity,
            captures: vec![],
            chunk: Chunk::new(),
        }
    }

    /// Number of upvalues a closure over this function holds
    pub fn upvalue_count(&self) -> usize {
        self.captures.len()
    }
}

/// Source of a captured variable at closure creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capture {
    /// A local slot of the frame executing the `Closure` instruction
    Local(u8),
    /// An upvalue of the closure executing the `Closure` instruction
    Upvalue(u8),
}

#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    String(SmolStr),
    Function(Arc<FunctionProto>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            // Functions are only equal to themselves
            (Constant::Function(a), Constant::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Number(n) => write!(f, "{}", n),
            Constant::String(s) => f.write_str(s),
            Constant::Function(func) => match &func.name {
                Some(name) => write!(f, "<fn {}>", name),
                None => f.write_str("<script>"),
            },
        }
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::String(s.into())
    }
}

impl From<FunctionProto> for Constant {
    fn from(f: FunctionProto) -> Self {
        Constant::Function(Arc::new(f))
    }
}
