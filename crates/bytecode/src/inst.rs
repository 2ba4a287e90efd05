mod param;
mod util;

use enum_ordinalize::Ordinalize;

pub use param::{Cnt, ConstIdx, Offset, Slot, UpIdx};
pub use param::{IParamType, ParamType};

pub use util::*;

macro_rules! define_inst {
    (
        $(#[$meta:meta])*
        // type names
        $ty_vis:vis $type:ident,
        // instruction variant definition
        $(
            // metadata for this variant. Will be put inside the final enum
            $(#[$variant_meta:meta])*
            // variant name
            $name:ident
            // params
            $(($param_name:ident : $param:ident))?
        ),*
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Copy, Ordinalize)]
        #[repr(u8)]
        $ty_vis enum $type {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $type {
            /// Returns the type of parameters of this instruction
            #[allow(path_statements)]
            pub fn param_type(self) -> Option<ParamType> {
                match self {$(
                    $type::$name => {
                        None::<ParamType>
                        $(; Some(ParamType::$param))?
                    }
                ),*
                }
            }

            /// Total encoded length of this instruction, opcode included
            pub fn encoded_len(self) -> usize {
                1 + self.param_type().map_or(0, ParamType::width)
            }

            pub fn mnemonic(self) -> &'static str {
                match self {$(
                    Self::$name => stringify!($name),
                )*}
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.mnemonic())
            }
        }
    };
}

// instruction definition.
//
// Each line is an instruction with at most one fixed-width operand.
define_inst! {
    /// The instruction set. Each instruction is one opcode byte followed by
    /// either no operand or exactly one little-endian operand.
    pub Inst,

    // constants
    /// Push the `idx`th value of the constant pool
    Constant(idx: ConstIdx),
    /// Push nil
    Nil,
    /// Push boolean true
    True,
    /// Push boolean false
    False,

    // stack manipulation
    /// Discard the stack top
    Pop,

    // load/stores
    /// Push the value in the `slot`th local of the current frame
    GetLocal(slot: Slot),
    /// Store the stack top into the `slot`th local. The value stays on stack.
    SetLocal(slot: Slot),
    /// Push the global named by the `idx`th constant
    GetGlobal(idx: ConstIdx),
    /// Pop the stack top into a (possibly new) global named by the `idx`th constant
    DefineGlobal(idx: ConstIdx),
    /// Store the stack top into an existing global. The value stays on stack.
    SetGlobal(idx: ConstIdx),

    // upvalues
    /// Push the value referenced by the `idx`th upvalue of the running closure
    GetUpvalue(idx: UpIdx),
    /// Store the stack top through the `idx`th upvalue. The value stays on stack.
    SetUpvalue(idx: UpIdx),

    // properties
    /// Replace the instance at stack top with its field or bound method named
    /// by the `idx`th constant
    GetProperty(idx: ConstIdx),
    /// Pops `[instance, value]`, writes the field and pushes `value` back
    SetProperty(idx: ConstIdx),

    // comparison
    Equal,
    Greater,
    Less,

    // arithmetic
    /// Add two numbers or concatenate two strings
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,

    /// Pop the stack top and print it
    Print,

    // control flow
    /// Jump forward `offset` bytes
    Jump(offset: Offset),
    /// Jump forward `offset` bytes if the stack top is falsy. Does not pop.
    JumpIfFalse(offset: Offset),
    /// Jump backward `offset` bytes
    Loop(offset: Offset),

    // function
    /// Call a value. The stack contains first the callee, and then the
    /// `n_args` arguments to be passed into it.
    ///
    /// ```plaintext
    /// (stack bottom) ..., callee, arg0, arg1, ..., argN (stack top)
    ///                    |-----> These values are popped
    ///                    |<-- This value is pushed
    /// (stack bottom) ..., result (stack top)
    /// ```
    Call(n_args: Cnt),
    /// Wrap the function in the `idx`th constant into a closure, capturing
    /// the variables listed in its capture descriptors
    Closure(idx: ConstIdx),
    /// Close every upvalue pointing at the stack top, then pop it
    CloseUpvalue,
    /// Return the stack top from the current function
    Return,

    // classes
    /// Push a new class named by the `idx`th constant
    Class(idx: ConstIdx),
    /// Pops a closure and binds it as method `idx` of the class below it
    Method(idx: ConstIdx)
}
