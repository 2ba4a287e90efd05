use expect_test::expect;
use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::disasm::{disassemble, disassemble_instruction};
use crate::inst::{
    Cnt, ConstIdx, Inst, InstContainer, InstReader, Offset, ParamType, Slot, UpIdx,
};
use crate::{Capture, ChunkError, Constant, FunctionProto};

/// `-((1.2 + 3.4) / 5.6)`, all on line 123
fn arithmetic_proto() -> FunctionProto {
    let mut f = FunctionProto::new(Some("demo".into()), 0);
    let c = &mut f.chunk;
    c.emit_constant(1.2, 123).unwrap();
    c.emit_constant(3.4, 123).unwrap();
    c.emit(Inst::Add, 123);
    c.emit_constant(5.6, 123).unwrap();
    c.emit(Inst::Divide, 123);
    c.emit(Inst::Negate, 123);
    c.emit(Inst::Return, 123);
    f
}

#[test]
fn test_disassemble_arithmetic() {
    expect![[r#"
        == demo ==
        0000  123 Constant            0 '1.2'
        0003    | Constant            1 '3.4'
        0006    | Add
        0007    | Constant            2 '5.6'
        0010    | Divide
        0011    | Negate
        0012    | Return
    "#]]
    .assert_eq(&disassemble(&arithmetic_proto()));
}

#[test]
fn test_disassemble_jumps() {
    let mut f = FunctionProto::new(Some("spin".into()), 0);
    let c = &mut f.chunk;
    c.emit(Inst::Nil, 1);
    let exit = c.emit_jump(Inst::JumpIfFalse, 1);
    c.emit(Inst::Pop, 2);
    c.emit_loop(0, 2).unwrap();
    c.patch_jump(exit).unwrap();
    c.emit(Inst::Return, 3);

    expect![[r#"
        == spin ==
        0000    1 Nil
        0001    | JumpIfFalse         1 -> 8
        0004    2 Pop
        0005    | Loop                5 -> 0
        0008    3 Return
    "#]]
    .assert_eq(&disassemble(&f));
}

#[test]
fn test_disassemble_nested_function() {
    let mut inner = FunctionProto::new(Some("inner".into()), 0);
    inner.captures.push(Capture::Local(1));
    inner.chunk.emit_p(Inst::GetUpvalue, UpIdx(0), 7);
    inner.chunk.emit(Inst::Return, 7);

    let mut script = FunctionProto::new(None, 0);
    script.chunk.emit_p(Inst::Closure, ConstIdx(0), 6);
    script.chunk.add_constant(inner).unwrap();
    script.chunk.emit_p(Inst::Call, Cnt(0), 6);
    script.chunk.emit(Inst::Return, 6);

    expect![[r#"
        == <script> ==
        0000    6 Closure             0 '<fn inner>'
        0003    | Call                0
        0005    | Return

        == inner ==
        0000    7 GetUpvalue          0
        0002    | Return
    "#]]
    .assert_eq(&disassemble(&script));
}

#[test]
fn test_unknown_and_truncated() {
    let code = [0xff, Inst::GetLocal.ordinal()];
    let lines = [1, 1];
    let (text, next) = disassemble_instruction(&code, &lines, 0, |_| None);
    assert_eq!(text, "0000    1 Unknown opcode 255");
    assert_eq!(next, 1);

    let (text, next) = disassemble_instruction(&code, &lines, 1, |_| None);
    assert_eq!(text, "0001    | GetLocal         <truncated>");
    assert_eq!(next, 2);
}

#[test]
fn test_reader_decodes_operands() {
    let mut f = FunctionProto::new(None, 0);
    f.chunk.emit_p(Inst::SetLocal, Slot(3), 1);
    f.chunk.emit_p(Inst::Jump, Offset(0x1234), 1);
    f.chunk.emit(Inst::Print, 1);

    let mut reader = InstReader::new(&f.chunk.code);
    assert_eq!(reader.read_inst(), Some(Ok(Inst::SetLocal)));
    assert_eq!(reader.read_param::<Slot>(), Some(Slot(3)));
    assert_eq!(reader.read_inst(), Some(Ok(Inst::Jump)));
    assert_eq!(reader.read_param::<Offset>(), Some(Offset(0x1234)));
    assert_eq!(reader.position(), 5);
    assert_eq!(reader.read_inst(), Some(Ok(Inst::Print)));
    assert!(reader.is_at_end());
    assert_eq!(reader.read_inst(), None);

    reader.seek(2);
    assert_eq!(reader.read_inst(), Some(Ok(Inst::Jump)));
    assert_eq!(reader.read_operand(ParamType::Offset), Some(0x1234));
}

#[test]
fn test_line_table_follows_code() {
    let f = arithmetic_proto();
    assert_eq!(f.chunk.lines.len(), f.chunk.code.len());
    assert_eq!(f.chunk.line(4), Some(123));
    assert_eq!(f.chunk.line(13), None);
}

#[test]
fn test_constants_are_shared() {
    let mut f = FunctionProto::new(None, 0);
    let a = f.chunk.add_constant("x").unwrap();
    let b = f.chunk.add_constant(1.0).unwrap();
    let c = f.chunk.add_constant("x").unwrap();
    assert_eq!(a, c);
    assert_ne!(a, b);
    assert_eq!(f.chunk.constants, vec![Constant::from("x"), Constant::from(1.0)]);
}

#[test]
fn test_constant_pool_limit() {
    let mut f = FunctionProto::new(None, 0);
    f.chunk.constants = (0..=u16::MAX as u32)
        .map(|i| Constant::Number(i as f64))
        .collect();
    assert_eq!(
        f.chunk.add_constant(-1.0),
        Err(ChunkError::TooManyConstants)
    );
    assert_eq!(f.chunk.constants.len(), u16::MAX as usize + 1);
    // existing entries are still addressable
    assert_eq!(f.chunk.add_constant(7.0), Ok(ConstIdx(7)));
}

#[test]
fn test_jump_too_long() {
    let mut f = FunctionProto::new(None, 0);
    let exit = f.chunk.emit_jump(Inst::Jump, 1);
    for _ in 0..=u16::MAX as usize {
        f.chunk.emit(Inst::Nil, 1);
    }
    assert_eq!(f.chunk.patch_jump(exit), Err(ChunkError::JumpTooLong));
}
