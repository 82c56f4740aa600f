//! Thin host binary: read a script path, hand it to the library's
//! `interpret`, and translate the result into the process exit code
//! spec.md's host CLI contract defines. Flag/subcommand parsing
//! (`tokenize`/`parse`/`evaluate`) is explicitly out of scope for this
//! core crate, so no `clap` dependency is introduced here.

use std::process::ExitCode;

use dynac::config::exit_code;
use dynac::vm::InterpretResult;

fn main() -> ExitCode {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "dynac".to_string());
    let Some(path) = args.next() else {
        eprintln!("Usage: {program} <script>");
        return ExitCode::from(exit_code::FILE_ERROR as u8);
    };

    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read file \"{path}\": {error}");
            return ExitCode::from(exit_code::FILE_ERROR as u8);
        }
    };

    match dynac::interpret(&source) {
        InterpretResult::Ok => ExitCode::from(exit_code::OK as u8),
        InterpretResult::CompileError => ExitCode::from(exit_code::COMPILE_ERROR as u8),
        InterpretResult::RuntimeError => ExitCode::from(exit_code::RUNTIME_ERROR as u8),
    }
}
