//! # Host Bridge
//!
//! The default import provider for the `core` module. The engine pops an
//! import's arguments, hands them over in source order together with a
//! mutable borrow of linear memory, and pushes whatever comes back after
//! checking it against the import's declared result kinds.
//!
//! Provided imports:
//! - `core.DEBUG(val[, val])` prints one or two values to standard
//!   error.
//! - `core.writeline(addr)` reads a 4-byte little-endian length from
//!   `addr`, then that many bytes of UTF-8 payload from `addr + 4`, and
//!   writes them as a line to standard output.
//! - `core.readline(addr, max_length)` prompts on standard output,
//!   reads a line from standard input, truncates it to `max_length`
//!   bytes, stores it length-prefixed at `addr`, and returns the length;
//!   on end of input it returns -1 without touching memory.
//!
//! Anything else is an unknown import. Embedders with their own imports
//! supply a different callback to [`super::run`]; this one is what the
//! CLI wires in.

use std::io::{self, BufRead, Write};

use log::debug;

use crate::error::{Error, LinkError, TypeError};
use crate::memory::Memory;
use crate::value::Value;

/// Dispatch one host call by import name.
pub fn call_import(
    mem: &mut Memory,
    module: &str,
    field: &str,
    args: &[Value],
) -> Result<Vec<Value>, Error> {
    match (module, field) {
        ("core", "DEBUG") => host_debug(args),
        ("core", "writeline") => host_writeline(mem, args),
        ("core", "readline") => host_readline(mem, args),
        _ => Err(LinkError::UnknownImport(module.to_string(), field.to_string()).into()),
    }
}

/// An i32 argument interpreted as a memory address.
fn addr_arg(args: &[Value], idx: usize, what: &str) -> Result<usize, Error> {
    match args.get(idx) {
        Some(Value::I32(v)) if *v >= 0 => Ok(*v as usize),
        _ => Err(TypeError::CallSignature(format!("{} expects an i32 address", what)).into()),
    }
}

fn host_debug(args: &[Value]) -> Result<Vec<Value>, Error> {
    let scalar = |v: &Value| match v {
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
    };
    match args {
        [a] => eprintln!("DEBUG: {}", scalar(a)),
        [a, b] => eprintln!("DEBUG: {} {}", scalar(a), scalar(b)),
        _ => {
            return Err(
                TypeError::CallSignature("DEBUG takes one or two arguments".to_string()).into(),
            )
        }
    }
    Ok(vec![])
}

fn host_writeline(mem: &mut Memory, args: &[Value]) -> Result<Vec<Value>, Error> {
    let addr = addr_arg(args, 0, "writeline")?;
    debug!("writeline addr: 0x{:x}", addr);
    let length = mem.read_i32(addr)?;
    if length < 0 {
        return Err(TypeError::CallSignature("writeline length is negative".to_string()).into());
    }
    let bytes = mem.read_bytes(addr + 4, length as usize)?;
    println!("{}", String::from_utf8_lossy(bytes));
    Ok(vec![])
}

fn host_readline(mem: &mut Memory, args: &[Value]) -> Result<Vec<Value>, Error> {
    let addr = addr_arg(args, 0, "readline")?;
    let max_length = addr_arg(args, 1, "readline")?;
    debug!("readline addr: 0x{:x}, max_length: {}", addr, max_length);

    print!("user> ");
    io::stdout().flush().ok();

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|_| TypeError::CallSignature("readline failed to read input".to_string()))?;
    if read == 0 {
        // End of input: nothing is stored.
        return Ok(vec![Value::I32(-1)]);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }

    let take = line.len().min(max_length);
    let payload = &line.as_bytes()[..take];
    mem.write_i32(addr, payload.len() as i32)?;
    mem.write_bytes(addr + 4, payload)?;
    Ok(vec![Value::I32(payload.len() as i32)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeTrap;

    #[test]
    fn unknown_imports_are_link_errors() {
        let mut mem = Memory::new(1);
        assert_eq!(
            call_import(&mut mem, "foo", "bar", &[]),
            Err(Error::Link(LinkError::UnknownImport(
                "foo".to_string(),
                "bar".to_string()
            )))
        );
    }

    #[test]
    fn debug_accepts_one_or_two_values() {
        let mut mem = Memory::new(1);
        assert_eq!(
            call_import(&mut mem, "core", "DEBUG", &[Value::I32(1)]),
            Ok(vec![])
        );
        assert_eq!(
            call_import(&mut mem, "core", "DEBUG", &[Value::I32(1), Value::I64(2)]),
            Ok(vec![])
        );
        assert!(matches!(
            call_import(
                &mut mem,
                "core",
                "DEBUG",
                &[Value::I32(1), Value::I32(2), Value::I32(3)]
            ),
            Err(Error::Type(TypeError::CallSignature(_)))
        ));
    }

    #[test]
    fn writeline_reads_a_length_prefixed_string() {
        let mut mem = Memory::new(1);
        mem.write_i32(64, 2).unwrap();
        mem.write_bytes(68, b"hi").unwrap();
        assert_eq!(
            call_import(&mut mem, "core", "writeline", &[Value::I32(64)]),
            Ok(vec![])
        );
    }

    #[test]
    fn writeline_checks_its_address() {
        let mut mem = Memory::new(1);
        let oob = crate::memory::PAGE_SIZE as i32 - 2;
        assert!(matches!(
            call_import(&mut mem, "core", "writeline", &[Value::I32(oob)]),
            Err(Error::Trap(RuntimeTrap::MemoryOutOfBounds(_)))
        ));
        assert!(matches!(
            call_import(&mut mem, "core", "writeline", &[Value::I64(0)]),
            Err(Error::Type(TypeError::CallSignature(_)))
        ));
    }
}
