use bytes::BufMut;

use crate::inst::Inst;

use super::param::{Cnt, ConstIdx, Offset, Slot, UpIdx};
use super::{IParamType, ParamType};

/// Something instructions can be read out of.
pub trait InstContainer {
    fn seek(&mut self, offset: usize);
    fn position(&self) -> usize;
    fn read_u8(&mut self) -> Option<u8>;
    fn read_param<T: IParamType>(&mut self) -> Option<T>;

    /// Read the next opcode. Returns `Err(byte)` for a byte that names no
    /// instruction, and `None` at the end of the stream.
    fn read_inst(&mut self) -> Option<Result<Inst, u8>> {
        let byte = self.read_u8()?;
        Some(Inst::from_ordinal(byte).ok_or(byte))
    }

    /// Read an operand of the given type, widened to `u32`.
    fn read_operand(&mut self, ty: ParamType) -> Option<u32> {
        match ty {
            ParamType::ConstIdx => self.read_param::<ConstIdx>().map(IParamType::get),
            ParamType::Slot => self.read_param::<Slot>().map(IParamType::get),
            ParamType::UpIdx => self.read_param::<UpIdx>().map(IParamType::get),
            ParamType::Cnt => self.read_param::<Cnt>().map(IParamType::get),
            ParamType::Offset => self.read_param::<Offset>().map(IParamType::get),
        }
    }
}

pub trait InstContainerMut {
    fn write_u8(&mut self, v: u8);
    fn write_param(&mut self, v: impl IParamType);

    fn emit(&mut self, i: Inst) -> &mut Self {
        debug_assert!(i.param_type().is_none(), "{} takes an operand", i);
        self.write_u8(i.ordinal());
        self
    }

    fn emit_p<P: IParamType>(&mut self, i: Inst, v: P) -> &mut Self {
        debug_assert_eq!(
            i.param_type(),
            Some(P::PARAM_ENUM_TY),
            "operand type mismatch for {}",
            i
        );
        self.write_u8(i.ordinal());
        self.write_param(v);
        self
    }
}

impl<T> InstContainerMut for T
where
    T: BufMut,
{
    fn write_u8(&mut self, v: u8) {
        self.put_u8(v);
    }

    fn write_param(&mut self, v: impl IParamType) {
        v.write(self);
    }
}

/// A cursor over a borrowed instruction stream.
#[derive(Debug, Clone)]
pub struct InstReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> InstReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self::at(code, 0)
    }

    pub fn at(code: &'a [u8], pos: usize) -> Self {
        InstReader { code, pos }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.code.len()
    }
}

impl InstContainer for InstReader<'_> {
    fn seek(&mut self, offset: usize) {
        self.pos = offset
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        let b = *self.code.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn read_param<T: IParamType>(&mut self) -> Option<T> {
        let rest = self.code.get(self.pos..)?;
        if rest.len() < T::WIDTH {
            return None;
        }
        let param = T::parse(rest);
        self.pos += T::WIDTH;
        Some(param)
    }
}
