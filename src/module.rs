//! # Module Decoder
//!
//! Turns a module binary into decoded tables: type signatures, imports,
//! the function index space (imported functions first, then native
//! bodies), exports, linear memory, and the block/branch maps built by
//! the control-flow pre-pass.
//!
//! ## Binary layout (little-endian, LEB128 integers)
//! ```text
//! +------------------+------------------------------+
//! | Magic            | 4 bytes, 0x6d736100 ("\0asm")|
//! +------------------+------------------------------+
//! | Version          | 4 bytes, 0xc                 |
//! +------------------+------------------------------+
//! | Sections         | until end of input           |
//! |   id             | LEB128, 7-bit                |
//! |   length         | LEB128, 32-bit               |
//! |   payload        | `length` bytes               |
//! +------------------+------------------------------+
//! ```
//!
//! Type (1), Import (2), Function (3), Memory (5), Export (7), Code (10)
//! and Data (11) sections are decoded. Custom (0), Table (4), Global (6),
//! Start (8) and Element (9) are skipped whole; their contents are not
//! acted on in this binary version.
//!
//! Decoding is a single forward pass. After each code body the pre-pass
//! indexes its structured control, so a loaded [`Module`] is ready to
//! execute with no further analysis.

use std::collections::HashMap;

use log::{debug, info};

use crate::blocks::{self, Block};
use crate::error::{DecodeError, Error, LinkError};
use crate::memory::Memory;
use crate::reader::Reader;
use crate::value::{Type, TypeForm, ValueKind};

const MAGIC: u32 = 0x6d736100;
const VERSION: u32 = 0xc;

const SECTION_NAMES: [&str; 12] = [
    "Custom", "Type", "Import", "Function", "Table", "Memory", "Global", "Export", "Start",
    "Element", "Code", "Data",
];

/// What an import or export refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalKind {
    Function = 0,
    Table = 1,
    Memory = 2,
    Global = 3,
}

impl ExternalKind {
    pub fn from_code(code: u8) -> Option<ExternalKind> {
        match code {
            0x00 => Some(ExternalKind::Function),
            0x01 => Some(ExternalKind::Table),
            0x02 => Some(ExternalKind::Memory),
            0x03 => Some(ExternalKind::Global),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExternalKind::Function => "Function",
            ExternalKind::Table => "Table",
            ExternalKind::Memory => "Memory",
            ExternalKind::Global => "Global",
        }
    }
}

/// An entry of the import section, with its kind-specific tail.
#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

#[derive(Clone, Debug)]
pub enum ImportKind {
    Function { type_idx: usize },
    Table { initial: u32, maximum: Option<u32> },
    Memory { initial: u32, maximum: Option<u32> },
    Global { global_type: u8, mutability: u8 },
}

/// A native function: signature, flattened local declarations, and its
/// code range. `start..end` excludes the terminating `end` byte, which
/// sits at offset `end`; `label_addr` equals `end` so a `return` lands on
/// the function's own terminator.
#[derive(Clone, Debug)]
pub struct Function {
    pub type_idx: usize,
    pub index: usize,
    pub locals: Vec<ValueKind>,
    pub start: usize,
    pub end: usize,
    pub label_addr: usize,
}

/// An imported function: resolved by the host bridge at call time.
#[derive(Clone, Debug)]
pub struct FunctionImport {
    pub type_idx: usize,
    pub module: String,
    pub field: String,
}

/// One slot of the function index space.
#[derive(Clone, Debug)]
pub enum Func {
    Import(FunctionImport),
    Native(Function),
}

impl Func {
    pub fn type_idx(&self) -> usize {
        match self {
            Func::Import(f) => f.type_idx,
            Func::Native(f) => f.type_idx,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Export {
    pub field: String,
    pub kind: ExternalKind,
    pub index: usize,
}

/// A decoded module: every table the engine consults, plus the raw bytes
/// the reader executes from.
pub struct Module {
    pub data: Vec<u8>,
    pub types: Vec<Type>,
    pub imports: Vec<Import>,
    pub functions: Vec<Func>,
    pub exports: Vec<Export>,
    pub export_map: HashMap<String, Export>,
    pub memory: Memory,
    pub blocks: Vec<Block>,
    pub block_map: HashMap<usize, usize>,
    pub branch_map: HashMap<usize, usize>,
}

impl Module {
    /// Decode a module binary. The pre-pass runs as part of loading, so
    /// the returned module's block and branch maps are complete.
    pub fn load(data: Vec<u8>) -> Result<Module, Error> {
        let mut dec = Decoder {
            rdr: Reader::new(&data),
            types: Vec::new(),
            imports: Vec::new(),
            functions: Vec::new(),
            exports: Vec::new(),
            export_map: HashMap::new(),
            memory: None,
            blocks: Vec::new(),
            block_map: HashMap::new(),
            branch_map: HashMap::new(),
        };
        dec.read_magic()?;
        dec.read_version()?;
        while !dec.rdr.eof() {
            dec.read_section()?;
        }
        Ok(Module {
            types: dec.types,
            imports: dec.imports,
            functions: dec.functions,
            exports: dec.exports,
            export_map: dec.export_map,
            // A module that declares no memory still gets one page.
            memory: dec.memory.unwrap_or_else(|| Memory::new(1)),
            blocks: dec.blocks,
            block_map: dec.block_map,
            branch_map: dec.branch_map,
            data,
        })
    }

    /// Log the decoded tables, mirroring what the binary declared.
    pub fn dump(&self) {
        let mut block_keys: Vec<usize> = self.block_map.keys().copied().collect();
        block_keys.sort_unstable();
        info!(
            "block_map: {:?}",
            block_keys
                .iter()
                .map(|k| {
                    let b = &self.blocks[self.block_map[k]];
                    format!("{}[0x{:x}->0x{:x}]", b.kind.name(), b.start, b.end)
                })
                .collect::<Vec<_>>()
        );
        let mut branch_keys: Vec<usize> = self.branch_map.keys().copied().collect();
        branch_keys.sort_unstable();
        info!(
            "branch_map: {:?}",
            branch_keys
                .iter()
                .map(|k| format!("0x{:x}->0x{:x}", k, self.blocks[self.branch_map[k]].start))
                .collect::<Vec<_>>()
        );

        info!("Types:");
        for (i, t) in self.types.iter().enumerate() {
            info!(
                "  {} [form: {}, params: {:?}, results: {:?}]",
                i,
                t.form.name(),
                t.params.iter().map(|p| p.name()).collect::<Vec<_>>(),
                t.results.iter().map(|r| r.name()).collect::<Vec<_>>()
            );
        }

        info!("Imports:");
        for (i, imp) in self.imports.iter().enumerate() {
            match &imp.kind {
                ImportKind::Function { type_idx } => info!(
                    "  {} [type: {}, '{}.{}', kind: Function]",
                    i, type_idx, imp.module, imp.field
                ),
                ImportKind::Table { initial, maximum } | ImportKind::Memory { initial, maximum } => {
                    info!(
                        "  {} ['{}.{}', initial: {}, maximum: {:?}]",
                        i, imp.module, imp.field, initial, maximum
                    )
                }
                ImportKind::Global {
                    global_type,
                    mutability,
                } => info!(
                    "  {} ['{}.{}', kind: Global, type: {}, mutability: {}]",
                    i, imp.module, imp.field, global_type, mutability
                ),
            }
        }

        info!("Functions:");
        for (i, f) in self.functions.iter().enumerate() {
            match f {
                Func::Import(imp) => info!(
                    "  {} [type: {}, import: '{}.{}']",
                    i, imp.type_idx, imp.module, imp.field
                ),
                Func::Native(func) => info!(
                    "  {} [type: {}, locals: {:?}, start: 0x{:x}, end: 0x{:x}]",
                    i,
                    func.type_idx,
                    func.locals.iter().map(|l| l.name()).collect::<Vec<_>>(),
                    func.start,
                    func.end
                ),
            }
        }

        info!("Exports:");
        for (i, e) in self.exports.iter().enumerate() {
            info!(
                "  {} [kind: {}, field: {}, index: {}]",
                i,
                e.kind.name(),
                e.field,
                e.index
            );
        }
    }
}

/// Working state for one decode pass over a borrowed binary.
struct Decoder<'a> {
    rdr: Reader<'a>,
    types: Vec<Type>,
    imports: Vec<Import>,
    functions: Vec<Func>,
    exports: Vec<Export>,
    export_map: HashMap<String, Export>,
    memory: Option<Memory>,
    blocks: Vec<Block>,
    block_map: HashMap<usize, usize>,
    branch_map: HashMap<usize, usize>,
}

impl<'a> Decoder<'a> {
    fn read_magic(&mut self) -> Result<(), DecodeError> {
        let magic = self.rdr.read_word()?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        Ok(())
    }

    fn read_version(&mut self) -> Result<(), DecodeError> {
        let version = self.rdr.read_word()?;
        if version != VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        Ok(())
    }

    fn read_section(&mut self) -> Result<(), Error> {
        let id = self.rdr.read_leb(7, false)? as u8;
        let length = self.rdr.read_leb(32, false)? as usize;
        debug!(
            "section {} ({}), length {}",
            id,
            SECTION_NAMES.get(id as usize).unwrap_or(&"?"),
            length
        );
        match id {
            1 => self.parse_types()?,
            2 => self.parse_imports()?,
            3 => self.parse_functions()?,
            5 => self.parse_memory()?,
            7 => self.parse_exports()?,
            10 => self.parse_code()?,
            11 => self.parse_data()?,
            // Custom, Table, Global, Start, Element: skipped whole.
            0 | 4 | 6 | 8 | 9 => {
                self.rdr.read_bytes(length)?;
            }
            _ => return Err(DecodeError::UnknownSection(id).into()),
        }
        Ok(())
    }

    fn read_count(&mut self) -> Result<usize, DecodeError> {
        Ok(self.rdr.read_leb(32, false)? as usize)
    }

    fn read_kind(&mut self, bits: u32) -> Result<ValueKind, DecodeError> {
        let code = self.rdr.read_leb(bits, false)? as u8;
        ValueKind::from_code(code).ok_or(DecodeError::BadValueType(code))
    }

    fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_count()?;
        let bytes = self.rdr.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Flags LEB, initial LEB, and a maximum when bit 0 of the flags is
    /// set. Shared by memory/table declarations and their import tails.
    fn read_limits(&mut self) -> Result<(u32, Option<u32>), DecodeError> {
        let flags = self.rdr.read_leb(32, false)? as u32;
        let initial = self.rdr.read_leb(32, false)? as u32;
        let maximum = if flags & 0x1 != 0 {
            Some(self.rdr.read_leb(32, false)? as u32)
        } else {
            None
        };
        Ok((initial, maximum))
    }

    fn parse_types(&mut self) -> Result<(), DecodeError> {
        let count = self.read_count()?;
        for _ in 0..count {
            let form_code = self.rdr.read_leb(7, false)? as u8;
            let form = match form_code {
                0x20 => TypeForm::Func,
                _ => TypeForm::Empty,
            };
            let param_count = self.read_count()?;
            let mut params = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                params.push(self.read_kind(32)?);
            }
            let result_count = self.read_count()?;
            let mut results = Vec::with_capacity(result_count);
            for _ in 0..result_count {
                results.push(self.read_kind(32)?);
            }
            let index = self.types.len();
            self.types.push(Type {
                index: Some(index),
                form,
                params,
                results,
            });
        }
        Ok(())
    }

    fn parse_imports(&mut self) -> Result<(), Error> {
        let count = self.read_count()?;
        for _ in 0..count {
            let module = self.read_name()?;
            let field = self.read_name()?;
            let kind_code = self.rdr.read_byte()?;
            let kind = ExternalKind::from_code(kind_code)
                .ok_or(DecodeError::BadExternalKind(kind_code))?;
            let kind = match kind {
                ExternalKind::Function => {
                    let type_idx = self.read_count()?;
                    self.check_type(type_idx)?;
                    // Imported functions occupy the front of the
                    // function index space.
                    self.functions.push(Func::Import(FunctionImport {
                        type_idx,
                        module: module.clone(),
                        field: field.clone(),
                    }));
                    ImportKind::Function { type_idx }
                }
                ExternalKind::Table => {
                    self.rdr.read_leb(7, false)?; // element type
                    let (initial, maximum) = self.read_limits()?;
                    ImportKind::Table { initial, maximum }
                }
                ExternalKind::Memory => {
                    let (initial, maximum) = self.read_limits()?;
                    // An imported memory sizes the linear memory.
                    if self.memory.is_none() {
                        self.memory = Some(Memory::new(initial as usize));
                    }
                    ImportKind::Memory { initial, maximum }
                }
                ExternalKind::Global => {
                    let global_type = self.rdr.read_byte()?;
                    let mutability = self.rdr.read_leb(1, false)? as u8;
                    ImportKind::Global {
                        global_type,
                        mutability,
                    }
                }
            };
            self.imports.push(Import {
                module,
                field,
                kind,
            });
        }
        Ok(())
    }

    /// Signature indices are resolved eagerly so the engine can index
    /// the type table without further checks.
    fn check_type(&self, type_idx: usize) -> Result<(), LinkError> {
        if type_idx >= self.types.len() {
            return Err(LinkError::UnknownType(type_idx));
        }
        Ok(())
    }

    fn parse_functions(&mut self) -> Result<(), Error> {
        let count = self.read_count()?;
        for _ in 0..count {
            let type_idx = self.read_count()?;
            self.check_type(type_idx)?;
            let index = self.functions.len();
            self.functions.push(Func::Native(Function {
                type_idx,
                index,
                locals: Vec::new(),
                start: 0,
                end: 0,
                label_addr: 0,
            }));
        }
        Ok(())
    }

    fn parse_memory(&mut self) -> Result<(), DecodeError> {
        let count = self.read_count()?;
        for _ in 0..count {
            let (initial, _maximum) = self.read_limits()?;
            if self.memory.is_none() {
                self.memory = Some(Memory::new(initial as usize));
            }
        }
        Ok(())
    }

    fn parse_exports(&mut self) -> Result<(), DecodeError> {
        let count = self.read_count()?;
        for _ in 0..count {
            let field = self.read_name()?;
            let kind_code = self.rdr.read_byte()?;
            let kind = ExternalKind::from_code(kind_code)
                .ok_or(DecodeError::BadExternalKind(kind_code))?;
            let index = self.read_count()?;
            let export = Export { field, kind, index };
            self.export_map
                .insert(export.field.clone(), export.clone());
            self.exports.push(export);
        }
        Ok(())
    }

    fn parse_code(&mut self) -> Result<(), Error> {
        let body_count = self.read_count()?;
        // Bodies pair positionally with the native functions that follow
        // the imported ones in the index space.
        let import_count = self
            .functions
            .iter()
            .filter(|f| matches!(f, Func::Import(_)))
            .count();
        for body in 0..body_count {
            self.parse_code_body(body + import_count)?;
        }
        Ok(())
    }

    fn parse_code_body(&mut self, fidx: usize) -> Result<(), Error> {
        let body_size = self.read_count()?;
        let payload_start = self.rdr.pos;

        // Local declarations come in groups of (count, kind); flatten
        // them in declaration order.
        let group_count = self.read_count()?;
        let mut locals = Vec::new();
        for _ in 0..group_count {
            let count = self.read_count()?;
            let kind = self.read_kind(7)?;
            for _ in 0..count {
                locals.push(kind);
            }
        }

        let start = self.rdr.pos;
        let code_len = body_size
            .checked_sub(self.rdr.pos - payload_start)
            .and_then(|rest| rest.checked_sub(1))
            .ok_or(DecodeError::UnterminatedFunction)?;
        self.rdr.read_bytes(code_len)?;
        let end = self.rdr.pos;
        if self.rdr.read_byte()? != 0x0f {
            return Err(DecodeError::UnterminatedFunction.into());
        }

        match self.functions.get_mut(fidx) {
            Some(Func::Native(func)) => {
                func.locals = locals;
                func.start = start;
                func.end = end;
                func.label_addr = end;
            }
            _ => return Err(LinkError::UnknownFunction(fidx).into()),
        }

        blocks::find_blocks(
            self.rdr.bytes(),
            start,
            end,
            &mut self.blocks,
            &mut self.block_map,
            &mut self.branch_map,
        )?;
        Ok(())
    }

    /// Data segments: `index`, `offset`, `size`, then raw bytes copied
    /// into linear memory. Only memory 0 exists in this version.
    fn parse_data(&mut self) -> Result<(), Error> {
        let count = self.read_count()?;
        for _ in 0..count {
            let _index = self.read_count()?;
            let offset = self.read_count()?;
            let size = self.read_count()?;
            let bytes = self.rdr.read_bytes(size)?;
            let memory = self.memory.get_or_insert_with(|| Memory::new(1));
            memory.write_bytes(offset, bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeTrap;
    use crate::testutil::*;

    fn load_err(wasm: Vec<u8>) -> Error {
        match Module::load(wasm) {
            Ok(_) => panic!("expected the module to be rejected"),
            Err(e) => e,
        }
    }

    #[test]
    fn add_module_decodes() {
        let wasm = add_module();
        let m = Module::load(wasm).unwrap();

        assert_eq!(m.types.len(), 1);
        assert_eq!(m.types[0].form, TypeForm::Func);
        assert_eq!(m.types[0].params, vec![ValueKind::I32, ValueKind::I32]);
        assert_eq!(m.types[0].results, vec![ValueKind::I32]);

        assert_eq!(m.functions.len(), 1);
        let func = match &m.functions[0] {
            Func::Native(f) => f,
            other => panic!("expected a native function, got {:?}", other),
        };
        assert_eq!(func.type_idx, 0);
        assert!(func.locals.is_empty());
        // The code range ends on the terminating end byte.
        assert_eq!(m.data[func.end], 0x0f);
        assert_eq!(func.end - func.start, 5);
        assert_eq!(func.label_addr, func.end);

        let export = &m.export_map["add"];
        assert_eq!(export.kind, ExternalKind::Function);
        assert_eq!(export.index, 0);

        // No memory section: one default page.
        assert_eq!(m.memory.len(), crate::memory::PAGE_SIZE);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut wasm = add_module();
        wasm[0] = 0x01;
        assert_eq!(
            load_err(wasm),
            Error::Decode(DecodeError::BadMagic(0x6d736101))
        );
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut wasm = add_module();
        wasm[4] = 0x0b;
        assert_eq!(load_err(wasm), Error::Decode(DecodeError::BadVersion(0xb)));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let mut wasm = header();
        wasm.extend(section(12, &[]));
        assert_eq!(
            load_err(wasm),
            Error::Decode(DecodeError::UnknownSection(12))
        );
    }

    #[test]
    fn skipped_sections_consume_their_length() {
        let mut wasm = header();
        wasm.extend(section(0, b"some custom payload"));
        wasm.extend(section(8, &[0x00])); // Start
        let m = Module::load(wasm).unwrap();
        assert!(m.functions.is_empty());
    }

    #[test]
    fn truncated_module_reports_eof() {
        let mut wasm = add_module();
        wasm.truncate(wasm.len() - 3);
        assert!(matches!(
            load_err(wasm),
            Error::Decode(DecodeError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn function_imports_precede_native_functions() {
        let wasm = writeline_module(16);
        let m = Module::load(wasm).unwrap();
        assert_eq!(m.functions.len(), 2);
        match &m.functions[0] {
            Func::Import(imp) => {
                assert_eq!(imp.module, "core");
                assert_eq!(imp.field, "writeline");
            }
            other => panic!("expected an import, got {:?}", other),
        }
        assert!(matches!(&m.functions[1], Func::Native(_)));
        assert_eq!(m.export_map["main"].index, 1);
        assert_eq!(m.imports.len(), 1);
    }

    #[test]
    fn memory_section_sizes_the_memory() {
        let mut wasm = header();
        wasm.extend(memory_section(2));
        let m = Module::load(wasm).unwrap();
        assert_eq!(m.memory.len(), 2 * crate::memory::PAGE_SIZE);
    }

    #[test]
    fn data_section_initializes_memory() {
        let wasm = writeline_module(32);
        let m = Module::load(wasm).unwrap();
        assert_eq!(m.memory.read_i32(32).unwrap(), 11);
        assert_eq!(m.memory.read_bytes(36, 11).unwrap(), b"hello world");
    }

    #[test]
    fn data_segment_outside_memory_traps() {
        let mut wasm = header();
        wasm.extend(memory_section(1));
        wasm.extend(data_section(&[(crate::memory::PAGE_SIZE, b"x")]));
        assert!(matches!(
            load_err(wasm),
            Error::Trap(RuntimeTrap::MemoryOutOfBounds(_))
        ));
    }

    #[test]
    fn code_body_without_terminator_is_rejected() {
        let mut wasm = header();
        wasm.extend(type_section(&[func_type(&[], &[])]));
        wasm.extend(function_section(&[0]));
        // Body claims 2 bytes but ends with nop instead of end.
        wasm.extend(section(10, &{
            let mut p = uleb(1);
            p.extend(uleb(2));
            p.extend([0x00, 0x0a]);
            p
        }));
        assert_eq!(
            load_err(wasm),
            Error::Decode(DecodeError::UnterminatedFunction)
        );
    }
}
