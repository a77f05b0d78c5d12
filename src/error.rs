//! # Error Handling for the Interpreter
//!
//! This module defines the error families used throughout the decoder,
//! the control-flow pre-pass and the execution engine.
//!
//! ## Design
//! - [`DecodeError`] covers structural problems in the module binary:
//!   bad framing, malformed LEB128, unbalanced structured control.
//! - [`LinkError`] covers name/index resolution failures when an export
//!   or import is looked up.
//! - [`TypeError`] covers runtime signature and operand-kind mismatches.
//!   They are fatal in this interpreter: the run terminates with a
//!   message rather than producing a recoverable result.
//! - [`RuntimeTrap`] covers nonrecoverable conditions raised by executing
//!   instructions (`unreachable`, division by zero, reserved opcodes,
//!   out-of-range memory access, stack underflow).
//!
//! ## Propagation
//! Nothing is recovered internally. Every error unwinds the dispatch
//! loop via `?` and the entry point surfaces it; the CLI prints the
//! message and exits with status 1. The trap *name* is the first word of
//! each message, which is what the external test harness matches on.
//!
//! ## Display
//! All enums implement [`fmt::Display`] and [`std::error::Error`] so they
//! integrate with ordinary `Result` plumbing.

use std::fmt;

/// Structural errors detected while decoding a module or scanning a
/// function body.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeError {
    /// The 4-byte magic word was not `0x6d736100` (`"\0asm"`).
    BadMagic(u32),
    /// The 4-byte version word was not `0xc`.
    BadVersion(u32),
    /// A section ID outside the known table.
    UnknownSection(u8),
    /// An inline block-signature byte outside `0x00..=0x04`.
    BadBlockType(u8),
    /// A value-kind byte outside the value-kind table.
    BadValueType(u8),
    /// An external-kind byte outside `0x00..=0x03`.
    BadExternalKind(u8),
    /// An opcode with no entry in the operator table.
    BadOpcode(u8),
    /// A LEB128 integer used more continuation bytes than its bit width
    /// allows. Carries the offset where the integer started.
    LebOverflow(usize),
    /// An `else` with no open `if` to pair with. Carries its offset.
    UnmatchedElse(usize),
    /// An `end` with no open block to close. Carries its offset.
    UnmatchedEnd(usize),
    /// A function body with no terminating `end` byte.
    UnterminatedFunction,
    /// A read past the end of the module bytes. Carries the read offset.
    UnexpectedEof(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadMagic(got) => {
                write!(f, "BadMagic: wanted 0x6d736100, got 0x{:x}", got)
            }
            DecodeError::BadVersion(got) => {
                write!(f, "BadVersion: wanted 0xc, got 0x{:x}", got)
            }
            DecodeError::UnknownSection(id) => {
                write!(f, "UnknownSection: section id {}", id)
            }
            DecodeError::BadBlockType(code) => {
                write!(f, "BadBlockType: inline signature 0x{:x}", code)
            }
            DecodeError::BadValueType(code) => {
                write!(f, "BadValueType: value kind 0x{:x}", code)
            }
            DecodeError::BadExternalKind(code) => {
                write!(f, "BadExternalKind: external kind 0x{:x}", code)
            }
            DecodeError::BadOpcode(op) => {
                write!(f, "BadOpcode: unrecognized opcode 0x{:x}", op)
            }
            DecodeError::LebOverflow(pos) => {
                write!(f, "LEBOverflow: integer at byte 0x{:x} overflows", pos)
            }
            DecodeError::UnmatchedElse(pos) => {
                write!(f, "UnmatchedElse: else at 0x{:x} not matched with if", pos)
            }
            DecodeError::UnmatchedEnd(pos) => {
                write!(f, "UnmatchedEnd: end at 0x{:x} closes nothing", pos)
            }
            DecodeError::UnterminatedFunction => {
                write!(f, "UnterminatedFunction: function body did not end with 0xf")
            }
            DecodeError::UnexpectedEof(pos) => {
                write!(f, "UnexpectedEof: read past end of module at 0x{:x}", pos)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Name or index resolution failures.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkError {
    /// The requested export name is not in the export map.
    UnknownExport(String),
    /// The host has no provider for `module.field`.
    UnknownImport(String, String),
    /// A function index outside the function table.
    UnknownFunction(usize),
    /// A signature index outside the type table.
    UnknownType(usize),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnknownExport(name) => {
                write!(f, "UnknownExport: no export named '{}'", name)
            }
            LinkError::UnknownImport(module, field) => {
                write!(f, "UnknownImport: invalid import {}.{}", module, field)
            }
            LinkError::UnknownFunction(idx) => {
                write!(f, "UnknownFunction: no function with index {}", idx)
            }
            LinkError::UnknownType(idx) => {
                write!(f, "UnknownType: no signature with index {}", idx)
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// Signature and operand-kind mismatches caught at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    /// An argument's kind does not match the called function's parameter.
    CallSignature(String),
    /// A block or function result does not match its declared kind.
    ResultSignature(String),
    /// An operand popped for an instruction has the wrong kind.
    /// Carries the instruction name.
    OperandKind(&'static str),
    /// A host import returned results that do not match its declaration.
    ReturnSignature(String),
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::CallSignature(msg) => {
                write!(f, "CallSignature: {}", msg)
            }
            TypeError::ResultSignature(msg) => {
                write!(f, "ResultSignature: {}", msg)
            }
            TypeError::OperandKind(op) => {
                write!(f, "OperandKind: wrong operand type for {}", op)
            }
            TypeError::ReturnSignature(msg) => {
                write!(f, "ReturnSignature: {}", msg)
            }
        }
    }
}

impl std::error::Error for TypeError {}

/// Nonrecoverable conditions raised while executing instructions.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeTrap {
    /// The `unreachable` instruction executed.
    Unreachable,
    /// Integer division by zero.
    DivideByZero,
    /// A decoded but reserved operation executed. Carries its name.
    Unimplemented(&'static str),
    /// A linear-memory access outside the allocated pages.
    MemoryOutOfBounds(usize),
    /// One of the runtime stacks was popped while empty.
    StackUnderflow,
}

impl fmt::Display for RuntimeTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeTrap::Unreachable => {
                write!(f, "Unreachable: executed an unreachable instruction")
            }
            RuntimeTrap::DivideByZero => {
                write!(f, "DivideByZero: integer division by zero")
            }
            RuntimeTrap::Unimplemented(what) => {
                write!(f, "Unimplemented: {}", what)
            }
            RuntimeTrap::MemoryOutOfBounds(pos) => {
                write!(f, "MemoryOutOfBounds: address 0x{:x} outside linear memory", pos)
            }
            RuntimeTrap::StackUnderflow => {
                write!(f, "StackUnderflow: popped an empty stack")
            }
        }
    }
}

impl std::error::Error for RuntimeTrap {}

/// Top-level error wrapper carried through the decoder and the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    Decode(DecodeError),
    Link(LinkError),
    Type(TypeError),
    Trap(RuntimeTrap),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(e) => write!(f, "{}", e),
            Error::Link(e) => write!(f, "{}", e),
            Error::Type(e) => write!(f, "{}", e),
            Error::Trap(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Error {
        Error::Decode(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Error {
        Error::Link(e)
    }
}

impl From<TypeError> for Error {
    fn from(e: TypeError) -> Error {
        Error::Type(e)
    }
}

impl From<RuntimeTrap> for Error {
    fn from(e: RuntimeTrap) -> Error {
        Error::Trap(e)
    }
}
