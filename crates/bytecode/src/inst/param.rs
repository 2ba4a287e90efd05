use bytes::{Buf, BufMut};
use std::fmt::Display;

/// An operand type that can be encoded inline after an opcode.
///
/// Every operand has a fixed width, so the reader never has to inspect the
/// operand bytes to know where the next instruction starts.
pub trait IParamType: Sized + Copy + Display {
    const PARAM_ENUM_TY: ParamType;

    /// Number of bytes this operand occupies in the instruction stream.
    const WIDTH: usize;

    /// Parse the param from the buffer's head pointer. **Panics if the buffer
    /// holds less than [`Self::WIDTH`] bytes.**
    fn parse(r: impl Buf) -> Self;

    /// Write the param into the given buffer.
    fn write(&self, w: impl BufMut);

    /// Widen the operand into a plain integer.
    fn get(self) -> u32;
}

macro_rules! param_types {
    ($ty_name:ident,
        $($(#[$variant_meta:meta])* $name:ident($inner:ty) => $get:ident, $put:ident),*
    ) => {
        /// The kind of operand an instruction carries.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $ty_name {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $ty_name {
            /// Encoded width of this operand in bytes
            pub const fn width(self) -> usize {
                match self {$(
                    Self::$name => <$name as IParamType>::WIDTH,
                )*}
            }
        }

        $(
            $(#[$variant_meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub $inner);

            impl IParamType for $name {
                const PARAM_ENUM_TY: ParamType = $ty_name::$name;
                const WIDTH: usize = std::mem::size_of::<$inner>();

                fn parse(mut r: impl Buf) -> Self {
                    $name(r.$get())
                }

                fn write(&self, mut w: impl BufMut) {
                    w.$put(self.0)
                }

                fn get(self) -> u32 {
                    self.0 as u32
                }
            }

            impl Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    Display::fmt(&self.0, f)
                }
            }
        )*
    };
}

param_types! {
    ParamType,
    /// An index into the constant pool of the current chunk
    ConstIdx(u16) => get_u16_le, put_u16_le,
    /// A local slot, relative to the base of the current frame
    Slot(u8) => get_u8, put_u8,
    /// An index into the upvalue array of the running closure
    UpIdx(u8) => get_u8, put_u8,
    /// Count of arguments passed to a call
    Cnt(u8) => get_u8, put_u8,
    /// Unsigned jump distance, measured from the end of the operand
    Offset(u16) => get_u16_le, put_u16_le
}
