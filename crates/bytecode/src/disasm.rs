//! Human-readable decoding of instruction streams. Purely diagnostic.

use std::fmt::Write;

use crate::inst::{Inst, InstContainer, InstReader, ParamType};
use crate::{Constant, FunctionProto};

/// Disassemble a function and, after it, every function nested in its
/// constant pool.
pub fn disassemble(proto: &FunctionProto) -> String {
    let mut out = String::new();
    disassemble_into(proto, &mut out);
    out
}

fn disassemble_into(proto: &FunctionProto, out: &mut String) {
    let chunk = &proto.chunk;
    let _ = writeln!(out, "== {} ==", proto.name.as_deref().unwrap_or("<script>"));
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(&chunk.code, &chunk.lines, offset, |idx| {
            chunk.constants.get(idx).map(|c| c.to_string())
        });
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }
    for constant in &chunk.constants {
        if let Constant::Function(nested) = constant {
            out.push('\n');
            disassemble_into(nested, out);
        }
    }
}

/// Decode the instruction at `offset` into one line of text. Returns the
/// text and the offset of the following instruction.
///
/// `constant` resolves a constant-pool index into its display form, so the
/// same decoder serves both prototypes and loaded heap functions.
pub fn disassemble_instruction(
    code: &[u8],
    lines: &[u32],
    offset: usize,
    constant: impl Fn(usize) -> Option<String>,
) -> (String, usize) {
    let mut s = format!("{:04} ", offset);
    let line = lines.get(offset).copied().unwrap_or(0);
    if offset > 0 && lines.get(offset - 1) == Some(&line) {
        s.push_str("   | ");
    } else {
        let _ = write!(s, "{:>4} ", line);
    }

    let mut reader = InstReader::at(code, offset);
    let inst = match reader.read_inst() {
        Some(Ok(inst)) => inst,
        Some(Err(byte)) => {
            let _ = write!(s, "Unknown opcode {}", byte);
            return (s, offset + 1);
        }
        None => {
            s.push_str("<end of code>");
            return (s, offset + 1);
        }
    };

    let ty = match inst.param_type() {
        Some(ty) => ty,
        None => {
            let _ = write!(s, "{}", inst);
            return (s, reader.position());
        }
    };

    let operand = match reader.read_operand(ty) {
        Some(operand) => operand,
        None => {
            let _ = write!(s, "{:<16} <truncated>", inst);
            return (s, code.len());
        }
    };
    let next = reader.position();

    match ty {
        ParamType::ConstIdx => {
            let value = constant(operand as usize).unwrap_or_else(|| "<bad constant>".into());
            let _ = write!(s, "{:<16} {:>4} '{}'", inst, operand, value);
        }
        ParamType::Offset => {
            let target = if inst == Inst::Loop {
                next as i64 - operand as i64
            } else {
                next as i64 + operand as i64
            };
            let _ = write!(s, "{:<16} {:>4} -> {}", inst, offset, target);
        }
        ParamType::Slot | ParamType::UpIdx | ParamType::Cnt => {
            let _ = write!(s, "{:<16} {:>4}", inst, operand);
        }
    }
    (s, next)
}
