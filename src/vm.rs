//! # Stack-Based Execution Engine
//!
//! The dispatch loop that executes a decoded module, one opcode at a
//! time, steering a byte cursor through the code stream.
//!
//! ## Machine model
//! Four coordinated stacks, all owned by the running invocation:
//! - **operand stack**: the values instructions consume and produce.
//! - **local stack**: parameters and locals of every active frame,
//!   innermost on top. `get_local n` resolves to `len - 1 - n`, so a
//!   frame's parameter 0 sits on top of its segment.
//! - **signature stack**: the open structured regions, innermost on top.
//!   The bottommost entry of a frame is always the function itself;
//!   `block`/`loop`/`if`/`else` entries stack above it as execution
//!   enters them.
//! - **return-address stack**: one saved cursor position per active
//!   call, pushed by `call` and popped by the function's `end`. When the
//!   pop empties the stack, the top-level invocation is complete.
//!
//! ## Control transfer
//! Branches and returns are resolved through the block descriptors the
//! pre-pass recorded: a branch pops `depth + 1` signature entries (and
//! any locals they contributed) and jumps to the label address of the
//! last one. A `loop` label re-enters the loop header, everything else
//! lands one byte past the region's `end`. Reaching an `else` while
//! executing the taken arm of an `if` closes the arm like an `end` and
//! skips past the whole construct.
//!
//! ## Typing
//! Every call boundary, block result and numeric operand is checked
//! against its declared kind; a mismatch terminates the run with a
//! [`TypeError`]. Reserved opcodes decode but trap when executed.

use log::{info, log_enabled, trace, Level};

use std::collections::HashMap;

use crate::blocks::{Block, BlockKind};
use crate::error::{DecodeError, Error, LinkError, RuntimeTrap, TypeError};
use crate::memory::Memory;
use crate::module::{ExternalKind, Func, Function, Module};
use crate::opcode;
use crate::reader::Reader;
use crate::value::{Type, Value, ValueKind};

mod host;
mod ops_num;

pub use host::call_import;

/// The host side of an imported function call: memory to read and write,
/// the import's module and field names, and the arguments in source
/// order. Results are pushed left to right and checked against the
/// import's declared result kinds.
pub type HostImport<'a> =
    &'a mut dyn FnMut(&mut Memory, &str, &str, &[Value]) -> Result<Vec<Value>, Error>;

/// Execute an exported function of a loaded module.
///
/// `args` are the embedder's argument literals, parsed according to the
/// entry function's declared parameter kinds. All four stacks start
/// empty. Returns the entry function's result, if its signature declares
/// one.
pub fn run(
    module: &mut Module,
    name: &str,
    args: &[String],
    host: HostImport<'_>,
) -> Result<Option<Value>, Error> {
    let export = module
        .export_map
        .get(name)
        .ok_or_else(|| LinkError::UnknownExport(name.to_string()))?;
    if export.kind != ExternalKind::Function {
        return Err(LinkError::UnknownExport(name.to_string()).into());
    }
    let fidx = export.index;
    let func = module
        .functions
        .get(fidx)
        .ok_or(LinkError::UnknownFunction(fidx))?;
    let typ = &module.types[func.type_idx()];

    if args.len() != typ.params.len() {
        return Err(TypeError::CallSignature(format!(
            "{} takes {} arguments, got {}",
            name,
            typ.params.len(),
            args.len()
        ))
        .into());
    }
    let mut fargs = Vec::with_capacity(args.len());
    for (arg, kind) in args.iter().zip(&typ.params) {
        fargs.push(parse_arg(arg, *kind)?);
    }
    // The setup convention consumes arguments in pop order.
    fargs.reverse();

    info!("running function {} ({})", name, fidx);

    let m = &mut *module;
    let mut machine = Machine {
        rdr: Reader::new(&m.data),
        types: &m.types,
        functions: &m.functions,
        blocks: &m.blocks,
        block_map: &m.block_map,
        memory: &mut m.memory,
        host,
        stack: Vec::new(),
        localstack: Vec::new(),
        sigstack: Vec::new(),
        returnstack: Vec::new(),
    };
    machine.call_setup(fidx, fargs)?;
    machine.run_code()
}

/// Parse one argument literal against a declared parameter kind.
fn parse_arg(arg: &str, kind: ValueKind) -> Result<Value, Error> {
    let parsed = match kind {
        ValueKind::I32 => arg.parse::<i32>().ok().map(Value::I32),
        ValueKind::I64 => arg.parse::<i64>().ok().map(Value::I64),
        ValueKind::F32 => arg.parse::<f32>().ok().map(Value::F32),
        ValueKind::F64 => arg.parse::<f64>().ok().map(Value::F64),
        _ => None,
    };
    parsed.ok_or_else(|| {
        TypeError::CallSignature(format!("cannot parse '{}' as {}", arg, kind.name())).into()
    })
}

/// Pop a single value, trapping on an empty operand stack.
pub(super) fn pop(stack: &mut Vec<Value>) -> Result<Value, Error> {
    stack.pop().ok_or_else(|| RuntimeTrap::StackUnderflow.into())
}

/// One open entry of the signature stack.
#[derive(Clone, Copy, Debug)]
enum SigEntry {
    /// A native function frame, by function index.
    Func(usize),
    /// A structured region, by block-arena index.
    Block(usize),
}

/// What the dispatch loop should do after an `end` was handled.
enum Flow {
    Continue,
    /// The top-level frame finished with this result.
    Return(Option<Value>),
}

struct Machine<'m, 'h> {
    rdr: Reader<'m>,
    types: &'m [Type],
    functions: &'m [Func],
    blocks: &'m [Block],
    block_map: &'m HashMap<usize, usize>,
    memory: &'m mut Memory,
    host: HostImport<'h>,
    stack: Vec<Value>,
    localstack: Vec<Value>,
    sigstack: Vec<SigEntry>,
    returnstack: Vec<usize>,
}

impl<'m, 'h> Machine<'m, 'h> {
    fn run_code(&mut self) -> Result<Option<Value>, Error> {
        loop {
            if self.rdr.eof() {
                return Ok(None);
            }
            if log_enabled!(Level::Trace) {
                self.dump_stacks();
            }
            let cur_pos = self.rdr.pos;
            let op = self.rdr.read_byte()?;
            trace!("    [0x{:x} {} (0x{:x})]", cur_pos, opcode::name(op), op);
            match op {
                opcode::UNREACHABLE => return Err(RuntimeTrap::Unreachable.into()),
                opcode::BLOCK | opcode::LOOP => {
                    self.rdr.read_byte()?; // inline signature, pre-resolved
                    let bidx = self.block_at(cur_pos, op)?;
                    self.sigstack.push(SigEntry::Block(bidx));
                }
                opcode::IF => self.op_if(cur_pos)?,
                opcode::ELSE | opcode::END => {
                    if let Flow::Return(res) = self.op_end(op, cur_pos)? {
                        return Ok(res);
                    }
                }
                opcode::SELECT => return Err(RuntimeTrap::Unimplemented("select").into()),
                opcode::BR => {
                    let depth = self.rdr.read_leb(32, false)? as usize;
                    self.do_branch(depth)?;
                }
                opcode::BR_IF => {
                    let depth = self.rdr.read_leb(32, false)? as usize;
                    let cond = self.pop_i32("br_if")?;
                    if cond != 0 {
                        self.do_branch(depth)?;
                    }
                }
                opcode::BR_TABLE => return Err(RuntimeTrap::Unimplemented("br_table").into()),
                opcode::RETURN => self.do_return()?,
                opcode::NOP => {}
                opcode::DROP => {
                    pop(&mut self.stack)?;
                }

                0x10 => {
                    // i32.const
                    let v = self.rdr.read_leb(32, true)? as i32;
                    self.stack.push(Value::I32(v));
                }
                0x11 => {
                    // i64.const
                    let v = self.rdr.read_leb(64, true)?;
                    self.stack.push(Value::I64(v));
                }
                0x12 => {
                    // f64.const
                    let v = self.rdr.read_f64()?;
                    self.stack.push(Value::F64(v));
                }
                0x13 => {
                    // f32.const
                    let v = self.rdr.read_f32()?;
                    self.stack.push(Value::F32(v));
                }

                0x14 => {
                    // get_local
                    let idx = self.local_index()?;
                    self.stack.push(self.localstack[idx]);
                }
                0x15 => {
                    // set_local
                    let idx = self.local_index()?;
                    let val = pop(&mut self.stack)?;
                    self.localstack[idx] = val;
                }
                0x19 => {
                    // tee_local: like set_local but the value stays put
                    let idx = self.local_index()?;
                    let val = *self
                        .stack
                        .last()
                        .ok_or(RuntimeTrap::StackUnderflow)?;
                    self.localstack[idx] = val;
                }

                0x16 => self.op_call()?,
                0x17 => return Err(RuntimeTrap::Unimplemented("call_indirect").into()),
                0xbb => return Err(RuntimeTrap::Unimplemented("get_global").into()),
                0xbc => return Err(RuntimeTrap::Unimplemented("set_global").into()),

                // Memory access is reserved in this version.
                0x20..=0x36 => {
                    return Err(RuntimeTrap::Unimplemented(opcode::name(op)).into())
                }
                0x39 => return Err(RuntimeTrap::Unimplemented("grow_memory").into()),
                0x3b => return Err(RuntimeTrap::Unimplemented("current_memory").into()),

                0x40..=0x5a | 0xb6 | 0xb7 => self.op_i32(op)?,
                0x5b..=0x74 | 0xb8..=0xba => self.op_i64(op)?,

                // Float arithmetic is reserved in this version.
                0x75..=0x9c => {
                    return Err(RuntimeTrap::Unimplemented(opcode::name(op)).into())
                }

                0xa6 => ops_num::i64_extend_s_i32(&mut self.stack)?,
                0xb0 => ops_num::f64_convert_s_i64(&mut self.stack)?,
                0x9d..=0xb5 => {
                    return Err(RuntimeTrap::Unimplemented(opcode::name(op)).into())
                }

                _ => return Err(DecodeError::BadOpcode(op).into()),
            }
        }
    }

    /// The implemented slice of the i32 operator group.
    fn op_i32(&mut self, op: u8) -> Result<(), Error> {
        match op {
            0x40 => ops_num::i32_add(&mut self.stack),
            0x41 => ops_num::i32_sub(&mut self.stack),
            0x42 => ops_num::i32_mul(&mut self.stack),
            0x4d => ops_num::i32_eq(&mut self.stack),
            0x4e => ops_num::i32_ne(&mut self.stack),
            0x4f => ops_num::i32_lt_s(&mut self.stack),
            _ => Err(RuntimeTrap::Unimplemented(opcode::name(op)).into()),
        }
    }

    /// The implemented slice of the i64 operator group.
    fn op_i64(&mut self, op: u8) -> Result<(), Error> {
        match op {
            0x5b => ops_num::i64_add(&mut self.stack),
            0x5c => ops_num::i64_sub(&mut self.stack),
            0x5d => ops_num::i64_mul(&mut self.stack),
            0x5e => ops_num::i64_div_s(&mut self.stack),
            0x6e => ops_num::i64_gt_s(&mut self.stack),
            _ => Err(RuntimeTrap::Unimplemented(opcode::name(op)).into()),
        }
    }

    /// Enter an `if`: the condition decides between the taken arm and
    /// the label address, which for an `if` paired with an `else` is the
    /// first instruction of the else arm.
    fn op_if(&mut self, cur_pos: usize) -> Result<(), Error> {
        self.rdr.read_byte()?; // inline signature, pre-resolved
        let bidx = self.block_at(cur_pos, opcode::IF)?;
        let cond = self.pop_i32("if")?;
        let block = &self.blocks[bidx];
        if cond != 0 {
            self.sigstack.push(SigEntry::Block(bidx));
        } else {
            // An else arm, when present, starts at this if's end offset
            // and becomes the open region instead of the if.
            if let Some(&else_idx) = self.block_map.get(&block.end) {
                if self.blocks[else_idx].kind == BlockKind::Else {
                    self.sigstack.push(SigEntry::Block(else_idx));
                }
            }
            self.rdr.pos = block.label_addr;
        }
        trace!(
            "if at 0x{:x}: cond {}, continuing at 0x{:x}",
            cur_pos,
            cond,
            self.rdr.pos
        );
        Ok(())
    }

    /// Close the innermost open region. `else` closes the taken arm of
    /// an `if` and additionally skips past the whole construct.
    fn op_end(&mut self, op: u8, cur_pos: usize) -> Result<Flow, Error> {
        let entry = self
            .sigstack
            .pop()
            .ok_or(DecodeError::UnmatchedEnd(cur_pos))?;
        if log_enabled!(Level::Trace) {
            trace!("end of {}", self.sig_repr(&entry));
        }
        let (result_kind, local_count) = match &entry {
            SigEntry::Block(b) => {
                let block = &self.blocks[*b];
                (block.typ.result(), block.typ.params.len())
            }
            SigEntry::Func(f) => {
                let func = self.native(*f)?;
                let typ = &self.types[func.type_idx];
                (typ.result(), typ.params.len() + func.locals.len())
            }
        };

        let res = match result_kind {
            Some(kind) => {
                let val = pop(&mut self.stack)?;
                if val.kind() != kind {
                    return Err(TypeError::ResultSignature(format!(
                        "got {}, declared {}",
                        val.kind().name(),
                        kind.name()
                    ))
                    .into());
                }
                Some(val)
            }
            None => None,
        };
        for _ in 0..local_count {
            self.localstack.pop().ok_or(RuntimeTrap::StackUnderflow)?;
        }

        match entry {
            SigEntry::Func(fidx) => {
                let return_addr = self
                    .returnstack
                    .pop()
                    .ok_or(RuntimeTrap::StackUnderflow)?;
                if self.returnstack.is_empty() {
                    // Back at the top level: the invocation is done.
                    return Ok(Flow::Return(res));
                }
                trace!("returning from function {} to 0x{:x}", fidx, return_addr);
                self.rdr.pos = return_addr;
                if let Some(val) = res {
                    self.stack.push(val);
                }
            }
            SigEntry::Block(_) => {
                if op == opcode::ELSE {
                    // The taken if arm ran into the else byte: skip the
                    // else arm entirely.
                    let else_idx = self
                        .block_map
                        .get(&cur_pos)
                        .copied()
                        .ok_or(DecodeError::UnmatchedElse(cur_pos))?;
                    self.rdr.pos = self.blocks[else_idx].label_addr;
                }
                if let Some(val) = res {
                    self.stack.push(val);
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Unwind `depth + 1` open regions and jump to the label address of
    /// the last one. Branching out of the function itself is reserved;
    /// `return` covers that.
    fn do_branch(&mut self, depth: usize) -> Result<(), Error> {
        let mut entry = self.sigstack.pop().ok_or(RuntimeTrap::StackUnderflow)?;
        for level in 0..=depth {
            let count = self.entry_local_count(&entry)?;
            for _ in 0..count {
                self.localstack.pop().ok_or(RuntimeTrap::StackUnderflow)?;
            }
            if level < depth {
                entry = self.sigstack.pop().ok_or(RuntimeTrap::StackUnderflow)?;
            }
        }
        match entry {
            SigEntry::Block(b) => {
                self.rdr.pos = self.blocks[b].label_addr;
                trace!("branch depth {} to 0x{:x}", depth, self.rdr.pos);
                Ok(())
            }
            SigEntry::Func(_) => Err(RuntimeTrap::Unimplemented("br to the function level").into()),
        }
    }

    /// Unwind every open region of the current frame and jump to the
    /// function's own `end`, which performs the actual return.
    fn do_return(&mut self) -> Result<(), Error> {
        loop {
            let top = *self
                .sigstack
                .last()
                .ok_or(RuntimeTrap::StackUnderflow)?;
            match top {
                SigEntry::Block(b) => {
                    self.sigstack.pop();
                    let count = self.blocks[b].typ.params.len();
                    for _ in 0..count {
                        self.localstack.pop().ok_or(RuntimeTrap::StackUnderflow)?;
                    }
                }
                SigEntry::Func(f) => {
                    let func = self.native(f)?;
                    self.rdr.pos = func.label_addr;
                    trace!("return to 0x{:x}", self.rdr.pos);
                    return Ok(());
                }
            }
        }
    }

    /// `call fidx`: pop the arguments, then either marshal them through
    /// the host bridge or set up a native frame.
    fn op_call(&mut self) -> Result<(), Error> {
        let fidx = self.rdr.read_leb(32, false)? as usize;
        let func = self
            .functions
            .get(fidx)
            .ok_or(LinkError::UnknownFunction(fidx))?;
        let typ = &self.types[func.type_idx()];

        // Arguments pop in reverse of their push order, so the i-th pop
        // must match the (n-1-i)-th parameter.
        let mut args = Vec::with_capacity(typ.params.len());
        for i in 0..typ.params.len() {
            let expected = typ.params[typ.params.len() - 1 - i];
            let val = pop(&mut self.stack)?;
            if val.kind() != expected {
                return Err(TypeError::CallSignature(format!(
                    "argument of kind {} where {} was declared",
                    val.kind().name(),
                    expected.name()
                ))
                .into());
            }
            args.push(val);
        }

        match func {
            Func::Import(imp) => {
                trace!("calling import {}.{}", imp.module, imp.field);
                // The host sees the arguments in source order.
                let mut host_args = args;
                host_args.reverse();
                let results =
                    (self.host)(&mut *self.memory, &imp.module, &imp.field, &host_args)?;
                for (i, rkind) in typ.results.iter().enumerate() {
                    match results.get(i) {
                        Some(val) if val.kind() == *rkind => self.stack.push(*val),
                        Some(val) => {
                            return Err(TypeError::ReturnSignature(format!(
                                "{}.{} returned {} where {} was declared",
                                imp.module,
                                imp.field,
                                val.kind().name(),
                                rkind.name()
                            ))
                            .into())
                        }
                        None => {
                            return Err(TypeError::ReturnSignature(format!(
                                "{}.{} returned too few results",
                                imp.module, imp.field
                            ))
                            .into())
                        }
                    }
                }
                Ok(())
            }
            Func::Native(_) => {
                trace!("calling function {}", fidx);
                self.call_setup(fidx, args)
            }
        }
    }

    /// Open a native frame: push the function onto the signature stack,
    /// save the cursor, move it to the body, and lay out locals and
    /// arguments so that `get_local 0` finds parameter 0 on top.
    ///
    /// `args` arrive in pop order: `args[0]` is the *last* parameter.
    fn call_setup(&mut self, fidx: usize, args: Vec<Value>) -> Result<(), Error> {
        let func = self.native(fidx)?;
        let typ = &self.types[func.type_idx];
        if args.len() != typ.params.len() {
            return Err(TypeError::CallSignature(format!(
                "function {} takes {} arguments, got {}",
                fidx,
                typ.params.len(),
                args.len()
            ))
            .into());
        }

        self.sigstack.push(SigEntry::Func(fidx));
        self.returnstack.push(self.rdr.pos);
        self.rdr.pos = func.start;
        trace!(
            "entering function {}: start 0x{:x}, end 0x{:x}, {} locals, {} params, {} results",
            fidx,
            func.start,
            func.end,
            func.locals.len(),
            typ.params.len(),
            typ.results.len()
        );

        // Locals in reverse declaration order, so local 0 sits deepest
        // below the parameters.
        for kind in func.locals.iter().rev() {
            let zero = Value::zero(*kind).ok_or_else(|| {
                TypeError::CallSignature(format!(
                    "local of kind {} has no runtime value",
                    kind.name()
                ))
            })?;
            self.localstack.push(zero);
        }
        // Arguments in reverse parameter order: parameter 0 ends on top.
        for (i, val) in args.into_iter().enumerate() {
            let expected = typ.params[typ.params.len() - 1 - i];
            if val.kind() != expected {
                return Err(TypeError::CallSignature(format!(
                    "argument of kind {} where {} was declared",
                    val.kind().name(),
                    expected.name()
                ))
                .into());
            }
            self.localstack.push(val);
        }
        Ok(())
    }

    fn native(&self, fidx: usize) -> Result<&'m Function, Error> {
        match self.functions.get(fidx) {
            Some(Func::Native(func)) => Ok(func),
            _ => Err(LinkError::UnknownFunction(fidx).into()),
        }
    }

    fn block_at(&self, pos: usize, op: u8) -> Result<usize, Error> {
        self.block_map
            .get(&pos)
            .copied()
            .ok_or_else(|| DecodeError::BadOpcode(op).into())
    }

    fn entry_local_count(&self, entry: &SigEntry) -> Result<usize, Error> {
        match entry {
            SigEntry::Block(b) => Ok(self.blocks[*b].typ.params.len()),
            SigEntry::Func(f) => {
                let func = self.native(*f)?;
                Ok(self.types[func.type_idx].params.len() + func.locals.len())
            }
        }
    }

    /// Resolve a local immediate against the top of the local stack.
    fn local_index(&mut self) -> Result<usize, Error> {
        let n = self.rdr.read_leb(32, false)? as usize;
        self.localstack
            .len()
            .checked_sub(1 + n)
            .ok_or_else(|| RuntimeTrap::StackUnderflow.into())
    }

    fn pop_i32(&mut self, op: &'static str) -> Result<i32, Error> {
        match pop(&mut self.stack)? {
            Value::I32(v) => Ok(v),
            _ => Err(TypeError::OperandKind(op).into()),
        }
    }

    fn sig_repr(&self, entry: &SigEntry) -> String {
        match entry {
            SigEntry::Block(b) => {
                let block = &self.blocks[*b];
                format!("{}<0->{}>", block.kind.name(), block.typ.results.len())
            }
            SigEntry::Func(f) => match &self.functions[*f] {
                Func::Native(func) => {
                    let typ = &self.types[func.type_idx];
                    format!(
                        "fn{}<{}/{}->{}>",
                        func.index,
                        typ.params.len(),
                        func.locals.len(),
                        typ.results.len()
                    )
                }
                Func::Import(imp) => format!("import<{}.{}>", imp.module, imp.field),
            },
        }
    }

    fn dump_stacks(&self) {
        let join = |vals: &[Value]| {
            vals.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        };
        trace!("      * stack:       [{}]", join(&self.stack));
        trace!("      * localstack:  [{}]", join(&self.localstack));
        trace!(
            "      * sigstack:    [{}]",
            self.sigstack
                .iter()
                .map(|s| self.sig_repr(s))
                .collect::<Vec<_>>()
                .join(" ")
        );
        trace!("      * returnstack: {:?}", self.returnstack);
    }
}
