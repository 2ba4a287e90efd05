//! The quill virtual machine: executes compiled function prototypes on a
//! value stack, with a tracing garbage collector owning every heap object.

pub mod config;
pub mod gc;
pub mod value;
pub mod vm;

pub use config::VmConfig;
pub use gc::{Gc, GcStats, Heap, ObjRef};
pub use value::Value;
pub use vm::error::{CompileError, InterpretResult, RuntimeError, RuntimeErrorKind};
pub use vm::{Compile, Vm};
