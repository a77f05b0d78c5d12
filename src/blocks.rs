//! # Control-Flow Pre-Pass
//!
//! Structured control in the code stream (`block`/`loop`/`if`/`else`
//! closed by `end`) is matched once, immediately after a function body is
//! decoded, and never re-derived during execution. Two linear scans over
//! the body produce:
//!
//! - the **block map**: start offset of each structured region onto a
//!   [`Block`] descriptor in the module's block arena, and
//! - the **branch map**: offset of each `br`/`br_if`/`br_table` onto the
//!   arena index of the region the recorded depth resolves to.
//!
//! ## Pass A
//! A working stack of open `(opcode, signature, start)` entries. Openers
//! push; `else` closes the innermost `if` and opens the else arm at the
//! same offset; `end` closes the innermost entry, except for the `end`
//! byte sitting at the body's end offset, which terminates the scan.
//! Anything else has its immediates skipped via the operator table.
//!
//! ## Label addresses
//! The branch target of each region depends on its kind: a `loop` jumps
//! back to its own start (re-entering the region), everything else jumps
//! one byte past its terminating `end`/`else`. An `if` paired with an
//! `else` therefore ends at the `else` byte and its label lands on the
//! first instruction of the else arm.
//!
//! ## Pass B
//! A second walk resolves branch depths against a stack of the regions
//! open at each offset. An `else` offset both closes the `if` and opens
//! the else arm, so the stack depth is identical on both sides of every
//! region. A depth that reaches past the innermost function level has no
//! block target and is left out of the map; executing such a branch is a
//! runtime trap.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::DecodeError;
use crate::opcode::{self, Immediate};
use crate::reader::Reader;
use crate::value::{Type, TypeForm, ValueKind};

/// What kind of structured region a [`Block`] describes. The
/// discriminants are the opcodes that open each region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Block = 0x01,
    Loop = 0x02,
    If = 0x03,
    Else = 0x04,
}

impl BlockKind {
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Block => "block",
            BlockKind::Loop => "loop",
            BlockKind::If => "if",
            BlockKind::Else => "else",
        }
    }
}

/// A structured region of a function body.
///
/// `start` is the offset of the opening opcode, `end` the offset of the
/// terminating `end` (or, for an `if` with an else arm, of the `else`).
/// `label_addr` is where a branch targeting this region lands.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub typ: Type,
    pub start: usize,
    pub end: usize,
    pub label_addr: usize,
}

/// Map an inline block-signature byte onto a synthesized signature:
/// empty, or exactly one numeric result.
pub fn block_type(code: u8) -> Result<Type, DecodeError> {
    let results = match code {
        0x00 => vec![],
        0x01 => vec![ValueKind::I32],
        0x02 => vec![ValueKind::I64],
        0x03 => vec![ValueKind::F32],
        0x04 => vec![ValueKind::F64],
        _ => return Err(DecodeError::BadBlockType(code)),
    };
    Ok(Type {
        index: None,
        form: TypeForm::Empty,
        params: vec![],
        results,
    })
}

/// Advance the reader past the immediates of `opcode`, which must be in
/// the operator table.
pub fn drop_immediates(rdr: &mut Reader<'_>, opcode: u8) -> Result<(), DecodeError> {
    let info = opcode::lookup(opcode).ok_or(DecodeError::BadOpcode(opcode))?;
    match info.imm {
        Immediate::None => {}
        Immediate::VarI32 | Immediate::VarU32 => {
            rdr.read_leb(32, false)?;
        }
        Immediate::VarI64 => {
            rdr.read_leb(64, false)?;
        }
        Immediate::U32 => {
            rdr.read_bytes(4)?;
        }
        Immediate::U64 => {
            rdr.read_bytes(8)?;
        }
        Immediate::BlockSig => {
            rdr.read_byte()?;
        }
        Immediate::Memory => {
            rdr.read_leb(32, false)?; // alignment flags
            rdr.read_leb(32, false)?; // offset
        }
        Immediate::BrTable => {
            let count = rdr.read_leb(32, false)? as usize;
            for _ in 0..count {
                rdr.read_leb(32, false)?;
            }
            rdr.read_leb(32, false)?; // default target
        }
    }
    Ok(())
}

/// Scan one function body (`start..end`, where the byte at `end` is the
/// terminating `end` opcode) and extend the module-wide block arena,
/// block map and branch map.
pub fn find_blocks(
    bytes: &[u8],
    start: usize,
    end: usize,
    blocks: &mut Vec<Block>,
    block_map: &mut HashMap<usize, usize>,
    branch_map: &mut HashMap<usize, usize>,
) -> Result<(), DecodeError> {
    // Pass A: match openers to their else/end and collect the regions.
    let mut rdr = Reader::at(bytes, start);
    let mut open: Vec<(u8, Type, usize)> = Vec::new();
    let mut found: Vec<(usize, BlockKind, Type, usize)> = Vec::new();
    loop {
        if rdr.pos > end {
            return Err(DecodeError::UnterminatedFunction);
        }
        let pos = rdr.pos;
        let op = rdr.read_byte()?;
        match op {
            opcode::BLOCK | opcode::LOOP | opcode::IF => {
                let sig = block_type(rdr.read_byte()?)?;
                open.push((op, sig, pos));
            }
            opcode::ELSE => {
                let (opener, sig, block_start) =
                    open.pop().ok_or(DecodeError::UnmatchedElse(pos))?;
                if opener != opcode::IF {
                    return Err(DecodeError::UnmatchedElse(pos));
                }
                found.push((block_start, BlockKind::If, sig.clone(), pos));
                open.push((opcode::ELSE, sig, pos));
            }
            opcode::END => {
                if pos == end {
                    break;
                }
                let (opener, sig, block_start) =
                    open.pop().ok_or(DecodeError::UnmatchedEnd(pos))?;
                let kind = match opener {
                    opcode::BLOCK => BlockKind::Block,
                    opcode::LOOP => BlockKind::Loop,
                    opcode::IF => BlockKind::If,
                    _ => BlockKind::Else,
                };
                found.push((block_start, kind, sig, pos));
            }
            _ => drop_immediates(&mut rdr, op)?,
        }
    }
    if !open.is_empty() {
        return Err(DecodeError::UnterminatedFunction);
    }

    // Materialize the regions into the arena.
    let mut end_offsets: HashSet<usize> = HashSet::new();
    for (block_start, kind, typ, block_end) in found {
        let label_addr = match kind {
            BlockKind::Loop => block_start,
            _ => block_end + 1,
        };
        end_offsets.insert(block_end);
        block_map.insert(block_start, blocks.len());
        blocks.push(Block {
            kind,
            typ,
            start: block_start,
            end: block_end,
            label_addr,
        });
    }

    // Pass B: resolve branch depths against the open regions.
    let mut rdr = Reader::at(bytes, start);
    let mut open: Vec<usize> = Vec::new();
    while rdr.pos < end {
        let pos = rdr.pos;
        let op = rdr.read_byte()?;
        let starts_here = block_map.get(&pos).copied();
        if end_offsets.contains(&pos) {
            // An else offset closes the if and opens the else arm.
            open.pop().ok_or(DecodeError::UnmatchedEnd(pos))?;
            if let Some(idx) = starts_here {
                open.push(idx);
            }
        } else if let Some(idx) = starts_here {
            open.push(idx);
        } else if (opcode::BR..=opcode::BR_TABLE).contains(&op) {
            let target_count = if op == opcode::BR_TABLE {
                rdr.read_leb(32, false)? as usize + 1 // +1 for the default
            } else {
                1
            };
            for _ in 0..target_count {
                let depth = rdr.read_leb(32, false)? as usize;
                if depth < open.len() {
                    let target = open[open.len() - 1 - depth];
                    debug!(
                        "0x{:x}: {} depth {} resolves to {} at 0x{:x}",
                        pos,
                        opcode::name(op),
                        depth,
                        blocks[target].kind.name(),
                        blocks[target].start
                    );
                    branch_map.insert(pos, target);
                } else {
                    // Targets the function level; the engine traps there.
                    debug!(
                        "0x{:x}: {} depth {} leaves the function",
                        pos,
                        opcode::name(op),
                        depth
                    );
                }
            }
            continue; // immediates already consumed
        }
        drop_immediates(&mut rdr, op)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the pre-pass over a raw body. The last byte must be the
    /// function-terminating `end`.
    fn scan(
        body: &[u8],
    ) -> Result<(Vec<Block>, HashMap<usize, usize>, HashMap<usize, usize>), DecodeError> {
        let mut blocks = Vec::new();
        let mut block_map = HashMap::new();
        let mut branch_map = HashMap::new();
        find_blocks(
            body,
            0,
            body.len() - 1,
            &mut blocks,
            &mut block_map,
            &mut branch_map,
        )?;
        Ok((blocks, block_map, branch_map))
    }

    #[test]
    fn nested_blocks_are_matched() {
        // block (block nop end) end end
        let body = [0x01, 0x00, 0x01, 0x00, 0x0a, 0x0f, 0x0f, 0x0f];
        let (blocks, block_map, _) = scan(&body).unwrap();
        assert_eq!(blocks.len(), 2);

        let outer = &blocks[block_map[&0]];
        assert_eq!(outer.kind, BlockKind::Block);
        assert_eq!(outer.end, 6);
        assert_eq!(outer.label_addr, 7);

        let inner = &blocks[block_map[&2]];
        assert_eq!(inner.end, 5);
        assert_eq!(inner.label_addr, 6);
    }

    #[test]
    fn loop_label_points_at_its_start() {
        // loop nop end end
        let body = [0x02, 0x00, 0x0a, 0x0f, 0x0f];
        let (blocks, block_map, _) = scan(&body).unwrap();
        let lp = &blocks[block_map[&0]];
        assert_eq!(lp.kind, BlockKind::Loop);
        assert_eq!(lp.label_addr, 0);
    }

    #[test]
    fn if_else_splits_at_the_else_offset() {
        // if(i32) i32.const 1 else i32.const 2 end end
        let body = [0x03, 0x01, 0x10, 0x01, 0x04, 0x10, 0x02, 0x0f, 0x0f];
        let (blocks, block_map, _) = scan(&body).unwrap();
        assert_eq!(blocks.len(), 2);

        let if_block = &blocks[block_map[&0]];
        assert_eq!(if_block.kind, BlockKind::If);
        assert_eq!(if_block.end, 4);
        // The if's label lands on the first instruction of the else arm.
        assert_eq!(if_block.label_addr, 5);
        assert_eq!(if_block.typ.results, vec![ValueKind::I32]);

        let else_block = &blocks[block_map[&4]];
        assert_eq!(else_block.kind, BlockKind::Else);
        assert_eq!(else_block.start, 4);
        assert_eq!(else_block.end, 7);
        assert_eq!(else_block.label_addr, 8);
    }

    #[test]
    fn branches_resolve_through_the_open_stack() {
        // block (loop (br 0) (br_if 1) end) end end
        let body = [
            0x01, 0x00, // 0: block
            0x02, 0x00, // 2: loop
            0x06, 0x00, // 4: br 0        -> loop
            0x07, 0x01, // 6: br_if 1     -> block
            0x0f, // 8: end (loop)
            0x0f, // 9: end (block)
            0x0f, // 10: end (function)
        ];
        let (blocks, block_map, branch_map) = scan(&body).unwrap();
        assert_eq!(branch_map[&4], block_map[&2]);
        assert_eq!(branch_map[&6], block_map[&0]);
        assert_eq!(blocks[branch_map[&4]].kind, BlockKind::Loop);
        assert_eq!(blocks[branch_map[&6]].kind, BlockKind::Block);
    }

    #[test]
    fn branch_inside_an_else_arm_sees_a_balanced_stack() {
        // block (if nop else (br 1) end) end end
        let body = [
            0x01, 0x00, // 0: block
            0x03, 0x00, // 2: if
            0x0a, // 4: nop
            0x04, // 5: else
            0x06, 0x01, // 6: br 1       -> block
            0x0f, // 8: end (if/else)
            0x0f, // 9: end (block)
            0x0f, // 10: end (function)
        ];
        let (_, block_map, branch_map) = scan(&body).unwrap();
        assert_eq!(branch_map[&6], block_map[&0]);
    }

    #[test]
    fn function_level_branches_are_not_mapped() {
        // br 0 at the function's own level has no block target.
        let body = [0x06, 0x00, 0x0f];
        let (_, _, branch_map) = scan(&body).unwrap();
        assert!(branch_map.is_empty());
    }

    #[test]
    fn unmatched_else_is_rejected() {
        let body = [0x0a, 0x04, 0x0f];
        assert_eq!(scan(&body), Err(DecodeError::UnmatchedElse(1)));
        // An else closing a block instead of an if is just as bad.
        let body = [0x01, 0x00, 0x04, 0x0f, 0x0f];
        assert_eq!(scan(&body), Err(DecodeError::UnmatchedElse(2)));
    }

    #[test]
    fn unmatched_end_is_rejected() {
        let body = [0x0a, 0x0f, 0x0f];
        assert_eq!(scan(&body), Err(DecodeError::UnmatchedEnd(1)));
    }

    #[test]
    fn unterminated_body_is_rejected() {
        // The block never closes before the function end.
        let body = [0x01, 0x00, 0x0a, 0x0f];
        assert_eq!(scan(&body), Err(DecodeError::UnterminatedFunction));
    }

    #[test]
    fn immediates_are_not_mistaken_for_opcodes() {
        // i64.const 0x0f would look like an end if immediates were not
        // skipped; i32.const 0x01 would look like a block.
        let body = [0x11, 0x0f, 0x10, 0x01, 0x0b, 0x0b, 0x0f];
        let (blocks, _, _) = scan(&body).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn bad_block_signature_is_rejected() {
        let body = [0x01, 0x05, 0x0f, 0x0f];
        assert_eq!(scan(&body), Err(DecodeError::BadBlockType(0x05)));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let body = [0x0c, 0x0f];
        assert_eq!(scan(&body), Err(DecodeError::BadOpcode(0x0c)));
    }
}
