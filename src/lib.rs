//! A minimal interpreter for the early (version 0xc) WebAssembly binary
//! module format.
//!
//! Loading a module decodes its sections, indexes the structured control
//! flow of every function body, and yields a [`Module`] ready to
//! execute. [`vm::run`] invokes a named export against the module's
//! linear memory, marshalling imported function calls through a
//! host-supplied callback.
//!
//! ```no_run
//! use wasm12::{vm, Module};
//!
//! let bytes = std::fs::read("module.wasm").unwrap();
//! let mut module = Module::load(bytes).unwrap();
//! let result = vm::run(&mut module, "main", &[], &mut vm::call_import).unwrap();
//! if let Some(value) = result {
//!     println!("{}", value);
//! }
//! ```

pub mod blocks;
pub mod error;
pub mod memory;
pub mod module;
pub mod opcode;
pub mod reader;
pub mod value;
pub mod vm;

#[cfg(test)]
pub mod testutil;

pub use error::Error;
pub use module::Module;
pub use value::Value;
