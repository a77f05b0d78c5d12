//! # Opcode Table
//!
//! Names and immediate layouts for the version-0xc opcode set. The
//! control-flow pre-pass uses the immediate layout to skip operands it
//! does not care about; the engine and the trace log use the names.
//!
//! Opcodes that the engine does not implement still have entries here:
//! their immediates must be understood so a linear scan can step over
//! them, and their names appear in `Unimplemented` trap messages.

use std::collections::HashMap;

use once_cell::sync::Lazy;

// Control opcodes the scanner and engine match on directly.
pub const UNREACHABLE: u8 = 0x00;
pub const BLOCK: u8 = 0x01;
pub const LOOP: u8 = 0x02;
pub const IF: u8 = 0x03;
pub const ELSE: u8 = 0x04;
pub const SELECT: u8 = 0x05;
pub const BR: u8 = 0x06;
pub const BR_IF: u8 = 0x07;
pub const BR_TABLE: u8 = 0x08;
pub const RETURN: u8 = 0x09;
pub const NOP: u8 = 0x0a;
pub const DROP: u8 = 0x0b;
pub const END: u8 = 0x0f;

/// Immediate layouts that follow an opcode in the code stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Immediate {
    /// No immediates.
    None,
    /// One signed LEB128, 32-bit.
    VarI32,
    /// One unsigned LEB128, 32-bit.
    VarU32,
    /// One signed LEB128, 64-bit.
    VarI64,
    /// Four raw bytes (an f32 bit pattern).
    U32,
    /// Eight raw bytes (an f64 bit pattern).
    U64,
    /// One inline block-signature byte.
    BlockSig,
    /// Two unsigned LEB128s: alignment flags and offset.
    Memory,
    /// A target count, that many targets, and a default target.
    BrTable,
}

pub struct OpInfo {
    pub name: &'static str,
    pub imm: Immediate,
}

fn op(name: &'static str, imm: Immediate) -> OpInfo {
    OpInfo { name, imm }
}

/// The operator table, keyed by opcode byte.
pub static OPERATORS: Lazy<HashMap<u8, OpInfo>> = Lazy::new(|| {
    use Immediate::*;
    let mut t = HashMap::new();

    // Control flow
    t.insert(0x00, op("unreachable", None));
    t.insert(0x01, op("block", BlockSig));
    t.insert(0x02, op("loop", BlockSig));
    t.insert(0x03, op("if", BlockSig));
    t.insert(0x04, op("else", None));
    t.insert(0x05, op("select", None));
    t.insert(0x06, op("br", VarU32));
    t.insert(0x07, op("br_if", VarU32));
    t.insert(0x08, op("br_table", BrTable));
    t.insert(0x09, op("return", None));
    t.insert(0x0a, op("nop", None));
    t.insert(0x0b, op("drop", None));
    t.insert(0x0f, op("end", None));

    // Constants, locals, calls
    t.insert(0x10, op("i32.const", VarI32));
    t.insert(0x11, op("i64.const", VarI64));
    t.insert(0x12, op("f64.const", U64));
    t.insert(0x13, op("f32.const", U32));
    t.insert(0x14, op("get_local", VarU32));
    t.insert(0x15, op("set_local", VarU32));
    t.insert(0x16, op("call", VarU32));
    t.insert(0x17, op("call_indirect", VarU32));
    t.insert(0x19, op("tee_local", VarU32));
    t.insert(0xbb, op("get_global", VarU32));
    t.insert(0xbc, op("set_global", VarU32));

    // Memory access
    t.insert(0x20, op("i32.load8_s", Memory));
    t.insert(0x21, op("i32.load8_u", Memory));
    t.insert(0x22, op("i32.load16_s", Memory));
    t.insert(0x23, op("i32.load16_u", Memory));
    t.insert(0x24, op("i64.load8_s", Memory));
    t.insert(0x25, op("i64.load8_u", Memory));
    t.insert(0x26, op("i64.load16_s", Memory));
    t.insert(0x27, op("i64.load16_u", Memory));
    t.insert(0x28, op("i64.load32_s", Memory));
    t.insert(0x29, op("i64.load32_u", Memory));
    t.insert(0x2a, op("i32.load", Memory));
    t.insert(0x2b, op("i64.load", Memory));
    t.insert(0x2c, op("f32.load", Memory));
    t.insert(0x2d, op("f64.load", Memory));
    t.insert(0x2e, op("i32.store8", Memory));
    t.insert(0x2f, op("i32.store16", Memory));
    t.insert(0x30, op("i64.store8", Memory));
    t.insert(0x31, op("i64.store16", Memory));
    t.insert(0x32, op("i64.store32", Memory));
    t.insert(0x33, op("i32.store", Memory));
    t.insert(0x34, op("i64.store", Memory));
    t.insert(0x35, op("f32.store", Memory));
    t.insert(0x36, op("f64.store", Memory));
    t.insert(0x39, op("grow_memory", None));
    t.insert(0x3b, op("current_memory", None));

    // i32 operations
    t.insert(0x40, op("i32.add", None));
    t.insert(0x41, op("i32.sub", None));
    t.insert(0x42, op("i32.mul", None));
    t.insert(0x43, op("i32.div_s", None));
    t.insert(0x44, op("i32.div_u", None));
    t.insert(0x45, op("i32.rem_s", None));
    t.insert(0x46, op("i32.rem_u", None));
    t.insert(0x47, op("i32.and", None));
    t.insert(0x48, op("i32.or", None));
    t.insert(0x49, op("i32.xor", None));
    t.insert(0x4a, op("i32.shl", None));
    t.insert(0x4b, op("i32.shr_u", None));
    t.insert(0x4c, op("i32.shr_s", None));
    t.insert(0x4d, op("i32.eq", None));
    t.insert(0x4e, op("i32.ne", None));
    t.insert(0x4f, op("i32.lt_s", None));
    t.insert(0x50, op("i32.le_s", None));
    t.insert(0x51, op("i32.lt_u", None));
    t.insert(0x52, op("i32.le_u", None));
    t.insert(0x53, op("i32.gt_s", None));
    t.insert(0x54, op("i32.ge_s", None));
    t.insert(0x55, op("i32.gt_u", None));
    t.insert(0x56, op("i32.ge_u", None));
    t.insert(0x57, op("i32.clz", None));
    t.insert(0x58, op("i32.ctz", None));
    t.insert(0x59, op("i32.popcnt", None));
    t.insert(0x5a, op("i32.eqz", None));
    t.insert(0xb6, op("i32.rotr", None));
    t.insert(0xb7, op("i32.rotl", None));

    // i64 operations
    t.insert(0x5b, op("i64.add", None));
    t.insert(0x5c, op("i64.sub", None));
    t.insert(0x5d, op("i64.mul", None));
    t.insert(0x5e, op("i64.div_s", None));
    t.insert(0x5f, op("i64.div_u", None));
    t.insert(0x60, op("i64.rem_s", None));
    t.insert(0x61, op("i64.rem_u", None));
    t.insert(0x62, op("i64.and", None));
    t.insert(0x63, op("i64.or", None));
    t.insert(0x64, op("i64.xor", None));
    t.insert(0x65, op("i64.shl", None));
    t.insert(0x66, op("i64.shr_u", None));
    t.insert(0x67, op("i64.shr_s", None));
    t.insert(0x68, op("i64.eq", None));
    t.insert(0x69, op("i64.ne", None));
    t.insert(0x6a, op("i64.lt_s", None));
    t.insert(0x6b, op("i64.le_s", None));
    t.insert(0x6c, op("i64.lt_u", None));
    t.insert(0x6d, op("i64.le_u", None));
    t.insert(0x6e, op("i64.gt_s", None));
    t.insert(0x6f, op("i64.ge_s", None));
    t.insert(0x70, op("i64.gt_u", None));
    t.insert(0x71, op("i64.ge_u", None));
    t.insert(0x72, op("i64.clz", None));
    t.insert(0x73, op("i64.ctz", None));
    t.insert(0x74, op("i64.popcnt", None));
    t.insert(0xb8, op("i64.rotr", None));
    t.insert(0xb9, op("i64.rotl", None));
    t.insert(0xba, op("i64.eqz", None));

    // f32 operations
    t.insert(0x75, op("f32.add", None));
    t.insert(0x76, op("f32.sub", None));
    t.insert(0x77, op("f32.mul", None));
    t.insert(0x78, op("f32.div", None));
    t.insert(0x79, op("f32.min", None));
    t.insert(0x7a, op("f32.max", None));
    t.insert(0x7b, op("f32.abs", None));
    t.insert(0x7c, op("f32.neg", None));
    t.insert(0x7d, op("f32.copysign", None));
    t.insert(0x7e, op("f32.ceil", None));
    t.insert(0x7f, op("f32.floor", None));
    t.insert(0x80, op("f32.trunc", None));
    t.insert(0x81, op("f32.nearest", None));
    t.insert(0x82, op("f32.sqrt", None));
    t.insert(0x83, op("f32.eq", None));
    t.insert(0x84, op("f32.ne", None));
    t.insert(0x85, op("f32.lt", None));
    t.insert(0x86, op("f32.le", None));
    t.insert(0x87, op("f32.gt", None));
    t.insert(0x88, op("f32.ge", None));

    // f64 operations
    t.insert(0x89, op("f64.add", None));
    t.insert(0x8a, op("f64.sub", None));
    t.insert(0x8b, op("f64.mul", None));
    t.insert(0x8c, op("f64.div", None));
    t.insert(0x8d, op("f64.min", None));
    t.insert(0x8e, op("f64.max", None));
    t.insert(0x8f, op("f64.abs", None));
    t.insert(0x90, op("f64.neg", None));
    t.insert(0x91, op("f64.copysign", None));
    t.insert(0x92, op("f64.ceil", None));
    t.insert(0x93, op("f64.floor", None));
    t.insert(0x94, op("f64.trunc", None));
    t.insert(0x95, op("f64.nearest", None));
    t.insert(0x96, op("f64.sqrt", None));
    t.insert(0x97, op("f64.eq", None));
    t.insert(0x98, op("f64.ne", None));
    t.insert(0x99, op("f64.lt", None));
    t.insert(0x9a, op("f64.le", None));
    t.insert(0x9b, op("f64.gt", None));
    t.insert(0x9c, op("f64.ge", None));

    // Conversions
    t.insert(0x9d, op("i32.trunc_s/f32", None));
    t.insert(0x9e, op("i32.trunc_s/f64", None));
    t.insert(0x9f, op("i32.trunc_u/f32", None));
    t.insert(0xa0, op("i32.trunc_u/f64", None));
    t.insert(0xa1, op("i32.wrap/i64", None));
    t.insert(0xa2, op("i64.trunc_s/f32", None));
    t.insert(0xa3, op("i64.trunc_s/f64", None));
    t.insert(0xa4, op("i64.trunc_u/f32", None));
    t.insert(0xa5, op("i64.trunc_u/f64", None));
    t.insert(0xa6, op("i64.extend_s/i32", None));
    t.insert(0xa7, op("i64.extend_u/i32", None));
    t.insert(0xa8, op("f32.convert_s/i32", None));
    t.insert(0xa9, op("f32.convert_u/i32", None));
    t.insert(0xaa, op("f32.convert_s/i64", None));
    t.insert(0xab, op("f32.convert_u/i64", None));
    t.insert(0xac, op("f32.demote/f64", None));
    t.insert(0xad, op("f32.reinterpret/i32", None));
    t.insert(0xae, op("f64.convert_s/i32", None));
    t.insert(0xaf, op("f64.convert_u/i32", None));
    t.insert(0xb0, op("f64.convert_s/i64", None));
    t.insert(0xb1, op("f64.convert_u/i64", None));
    t.insert(0xb2, op("f64.promote/f32", None));
    t.insert(0xb3, op("f64.reinterpret/i64", None));
    t.insert(0xb4, op("i32.reinterpret/f32", None));
    t.insert(0xb5, op("i64.reinterpret/f64", None));

    t
});

pub fn lookup(opcode: u8) -> Option<&'static OpInfo> {
    OPERATORS.get(&opcode)
}

/// The opcode's name, or a placeholder for bytes outside the table.
pub fn name(opcode: u8) -> &'static str {
    lookup(opcode).map(|info| info.name).unwrap_or("<unknown>")
}
