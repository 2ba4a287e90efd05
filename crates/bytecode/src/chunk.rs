use std::fmt::Display;

use crate::inst::{ConstIdx, IParamType, Inst, InstContainerMut, Offset};
use crate::Constant;

/// A chunk of bytecode: instructions, the source line of every byte, and
/// the constant pool.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    /// `lines[i]` is the source line of `code[i]`
    pub lines: Vec<u32>,
    pub constants: Vec<Constant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// The constant pool outgrew what a [`ConstIdx`] can address
    TooManyConstants,
    /// A jump distance does not fit in an [`Offset`]
    JumpTooLong,
}

impl Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkError::TooManyConstants => f.write_str("Too many constants in one chunk."),
            ChunkError::JumpTooLong => f.write_str("Too much code to jump over."),
        }
    }
}

impl std::error::Error for ChunkError {}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Source line of the byte at `offset`
    pub fn line(&self, offset: usize) -> Option<u32> {
        self.lines.get(offset).copied()
    }

    /// Append an operand-less instruction. Returns its offset.
    pub fn emit(&mut self, inst: Inst, line: u32) -> usize {
        let at = self.code.len();
        self.code.emit(inst);
        self.fill_lines(line);
        at
    }

    /// Append an instruction with its operand. Returns its offset.
    pub fn emit_p<P: IParamType>(&mut self, inst: Inst, param: P, line: u32) -> usize {
        let at = self.code.len();
        self.code.emit_p(inst, param);
        self.fill_lines(line);
        at
    }

    fn fill_lines(&mut self, line: u32) {
        self.lines.resize(self.code.len(), line);
    }

    /// Add a constant to the pool and return its index. Equal numbers and
    /// strings share one entry.
    pub fn add_constant(&mut self, constant: impl Into<Constant>) -> Result<ConstIdx, ChunkError> {
        let constant = constant.into();
        let idx = match self.constants.iter().position(|c| c == &constant) {
            Some(idx) => idx,
            None => {
                if self.constants.len() > u16::MAX as usize {
                    return Err(ChunkError::TooManyConstants);
                }
                self.constants.push(constant);
                self.constants.len() - 1
            }
        };
        Ok(ConstIdx(idx as u16))
    }

    /// Add a constant and emit a `Constant` instruction loading it.
    pub fn emit_constant(
        &mut self,
        constant: impl Into<Constant>,
        line: u32,
    ) -> Result<usize, ChunkError> {
        let idx = self.add_constant(constant)?;
        Ok(self.emit_p(Inst::Constant, idx, line))
    }

    /// Emit a forward jump with a placeholder distance. Returns the offset
    /// of the operand, to be handed to [`Self::patch_jump`].
    pub fn emit_jump(&mut self, inst: Inst, line: u32) -> usize {
        self.emit_p(inst, Offset(u16::MAX), line) + 1
    }

    /// Point the jump whose operand sits at `operand` to the end of the chunk.
    pub fn patch_jump(&mut self, operand: usize) -> Result<(), ChunkError> {
        let distance = self.code.len() - operand - Offset::WIDTH;
        let distance = u16::try_from(distance).map_err(|_| ChunkError::JumpTooLong)?;
        self.code[operand..operand + Offset::WIDTH].copy_from_slice(&distance.to_le_bytes());
        Ok(())
    }

    /// Emit a backward jump to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Result<usize, ChunkError> {
        let distance = self.code.len() + Inst::Loop.encoded_len() - loop_start;
        let distance = u16::try_from(distance).map_err(|_| ChunkError::JumpTooLong)?;
        Ok(self.emit_p(Inst::Loop, Offset(distance), line))
    }
}
