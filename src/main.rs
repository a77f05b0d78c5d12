//! Interpreter entry point.
//!
//! Usage: `interp <module.wasm> [entry] [arg…]`
//!
//! Loads a module binary, invokes the named export (default `main`) with
//! the given argument literals, and prints the result value, if any, to
//! standard output. Diagnostics go to standard error through the logger;
//! `RUST_LOG` controls verbosity (`trace` shows every instruction).
//!
//! Exit code 0 on normal termination. Any decode error, link error, type
//! error or trap prints its message and exits 1; the message line is
//! also what the external test harness matches against.

use std::env;
use std::fs;
use std::process;

use log::{error, info};

use wasm12::{vm, Module};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() -> String {
    format!(
        r#"wasm12 interpreter v{0}

Usage:
    interp <module.wasm> [entry] [arg...]

Arguments:
    <module.wasm>
        Path to a binary module (version 0xc).
    [entry]
        Name of the exported function to invoke. Defaults to "main".
    [arg...]
        Argument literals, parsed according to the entry function's
        declared parameter kinds.

Options:
    -h, --help
        Show this help message and exit.
    -v, --version
        Show interpreter version."#,
        VERSION
    )
}

/// Print the error line to standard output, log it, and exit 1.
fn fail(err: &dyn std::fmt::Display) -> ! {
    error!("{}", err);
    println!("{}", err);
    process::exit(1);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "-h" || args[1] == "--help" {
        println!("{}", usage());
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }
    if args[1] == "-v" || args[1] == "--version" {
        println!(
            "interp-{}-{}: v{}",
            env::consts::OS,
            env::consts::ARCH,
            VERSION
        );
        return;
    }

    let path = &args[1];
    let entry = args.get(2).cloned().unwrap_or_else(|| "main".to_string());
    let prog_args: &[String] = if args.len() > 3 { &args[3..] } else { &[] };

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => fail(&format!("failed to read {}: {}", path, e)),
    };

    let mut module = match Module::load(data) {
        Ok(module) => module,
        Err(e) => fail(&e),
    };
    module.dump();

    match vm::run(&mut module, &entry, prog_args, &mut vm::call_import) {
        Ok(Some(res)) => {
            info!("{}({}) = {}", entry, prog_args.join(","), res);
            println!("{}", res);
        }
        Ok(None) => {
            info!("{}({})", entry, prog_args.join(","));
        }
        Err(e) => fail(&e),
    }
}
