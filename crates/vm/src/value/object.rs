use std::fmt::Formatter;

use fnv::FnvHashMap;
use quill_bytecode::Capture;
use smol_str::SmolStr;

use super::Value;
use crate::gc::{hash_str, Gc, Heap, Trace, Tracer};

/// An immutable, interned string. Its hash is computed once on creation.
#[derive(Debug)]
pub struct LoxString {
    chars: Box<str>,
    hash: u64,
}

impl LoxString {
    pub(crate) fn new(s: &str) -> Self {
        LoxString {
            chars: s.into(),
            hash: hash_str(s),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// A function loaded from a compiled unit. Immutable once created.
#[derive(Debug)]
pub struct Function {
    /// `None` for the top-level script
    pub name: Option<Gc<LoxString>>,
    pub arity: u8,
    /// Where each upvalue of a closure over this function is captured from
    pub captures: Box<[Capture]>,
    pub code: Box<[u8]>,
    pub lines: Box<[u32]>,
    pub constants: Box<[Value]>,
}

impl Function {
    pub fn upvalue_count(&self) -> usize {
        self.captures.len()
    }
}

/// Calling convention of host functions: the argument window in, a value or
/// an error message out.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

#[derive(Clone)]
pub struct Native {
    pub name: SmolStr,
    pub arity: u8,
    pub function: NativeFn,
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Closure {
    pub function: Gc<Function>,
    pub upvalues: Box<[Gc<Upvalue>]>,
}

/// A captured variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    /// The variable still lives in this absolute stack slot
    Open(usize),
    /// The variable's frame has returned; the upvalue owns it now
    Closed(Value),
}

#[derive(Debug)]
pub struct Class {
    pub name: Gc<LoxString>,
    pub methods: FnvHashMap<Gc<LoxString>, Gc<Closure>>,
}

impl Class {
    pub fn new(name: Gc<LoxString>) -> Self {
        Class {
            name,
            methods: FnvHashMap::default(),
        }
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Gc<Class>,
    pub fields: FnvHashMap<Gc<LoxString>, Value>,
}

impl Instance {
    pub fn new(class: Gc<Class>) -> Self {
        Instance {
            class,
            fields: FnvHashMap::default(),
        }
    }
}

/// A method looked up off an instance, with the instance bound as receiver.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Gc<Closure>,
}

/// A type that can live in the heap as one of the [`Obj`] variants.
pub trait HeapKind: Trace + Sized {
    fn into_obj(self) -> Obj;
    fn from_obj(obj: &Obj) -> Option<&Self>;
    fn from_obj_mut(obj: &mut Obj) -> Option<&mut Self>;
}

macro_rules! heap_kinds {
    ($($(#[$meta:meta])* $variant:ident($ty:ident) => $kind_name:literal),*) => {
        /// Every kind of heap object.
        #[derive(Debug)]
        pub enum Obj {$(
            $(#[$meta])*
            $variant($ty)
        ),*}

        impl Obj {
            /// Name of this object's type, for error messages
            pub fn kind_name(&self) -> &'static str {
                match self {$(
                    Obj::$variant(_) => $kind_name,
                )*}
            }
        }

        impl Trace for Obj {
            fn trace(&self, tracer: &mut Tracer) {
                match self {$(
                    Obj::$variant(o) => o.trace(tracer),
                )*}
            }
        }

        $(
            impl HeapKind for $ty {
                fn into_obj(self) -> Obj {
                    Obj::$variant(self)
                }

                fn from_obj(obj: &Obj) -> Option<&Self> {
                    match obj {
                        Obj::$variant(v) => Some(v),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn from_obj_mut(obj: &mut Obj) -> Option<&mut Self> {
                    match obj {
                        Obj::$variant(v) => Some(v),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

heap_kinds! {
    String(LoxString) => "string",
    Function(Function) => "function",
    Native(Native) => "native function",
    Closure(Closure) => "function",
    Upvalue(Upvalue) => "upvalue",
    Class(Class) => "class",
    Instance(Instance) => "instance",
    BoundMethod(BoundMethod) => "function"
}

impl Obj {
    /// Bytes owned by the object beyond its fixed-size slot.
    pub(crate) fn extra_size(&self) -> usize {
        use std::mem::size_of;
        match self {
            Obj::String(s) => s.len(),
            Obj::Function(f) => {
                f.code.len()
                    + f.lines.len() * size_of::<u32>()
                    + f.constants.len() * size_of::<Value>()
                    + f.captures.len() * size_of::<Capture>()
            }
            Obj::Closure(c) => c.upvalues.len() * size_of::<Gc<Upvalue>>(),
            Obj::Class(c) => c.methods.len() * method_entry_size(),
            Obj::Instance(i) => i.fields.len() * field_entry_size(),
            Obj::Native(_) | Obj::Upvalue(_) | Obj::BoundMethod(_) => 0,
        }
    }

    pub(crate) fn fmt_with(&self, heap: &Heap, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Obj::String(s) => f.write_str(s.as_str()),
            Obj::Function(func) => fmt_function(func, heap, f),
            Obj::Native(_) => f.write_str("<native fn>"),
            Obj::Closure(c) => fmt_function(heap.get(c.function), heap, f),
            Obj::Upvalue(_) => f.write_str("upvalue"),
            Obj::Class(c) => f.write_str(heap.get(c.name).as_str()),
            Obj::Instance(i) => {
                let class = heap.get(i.class);
                write!(f, "{} instance", heap.get(class.name).as_str())
            }
            Obj::BoundMethod(b) => {
                let closure = heap.get(b.method);
                fmt_function(heap.get(closure.function), heap, f)
            }
        }
    }
}

fn fmt_function(func: &Function, heap: &Heap, f: &mut Formatter<'_>) -> std::fmt::Result {
    match func.name {
        Some(name) => write!(f, "<fn {}>", heap.get(name).as_str()),
        None => f.write_str("<script>"),
    }
}

pub(crate) const fn method_entry_size() -> usize {
    std::mem::size_of::<(Gc<LoxString>, Gc<Closure>)>()
}

pub(crate) const fn field_entry_size() -> usize {
    std::mem::size_of::<(Gc<LoxString>, Value)>()
}

impl Trace for LoxString {
    fn trace(&self, _tracer: &mut Tracer) {}
}

impl Trace for Native {
    fn trace(&self, _tracer: &mut Tracer) {}
}

impl Trace for Function {
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(name) = self.name {
            tracer.mark(name);
        }
        for it in self.constants.iter() {
            tracer.mark_value(it)
        }
    }
}

impl Trace for Closure {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.function);
        self.upvalues.iter().for_each(|v| tracer.mark(*v));
    }
}

impl Trace for Upvalue {
    fn trace(&self, tracer: &mut Tracer) {
        match self {
            // the slot itself is a root while it is on the stack
            Upvalue::Open(_) => {}
            Upvalue::Closed(val) => tracer.mark_value(val),
        }
    }
}

impl Trace for Class {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.name);
        self.methods.iter().for_each(|(name, method)| {
            tracer.mark(*name);
            tracer.mark(*method);
        });
    }
}

impl Trace for Instance {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.class);
        self.fields.iter().for_each(|(name, val)| {
            tracer.mark(*name);
            tracer.mark_value(val);
        });
    }
}

impl Trace for BoundMethod {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark_value(&self.receiver);
        tracer.mark(self.method);
    }
}
