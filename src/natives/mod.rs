//! Built-in native functions, registered into `globals` at VM startup.
//!
//! Mirrors the shape of the teacher's `std_mod/time.rs` (a native wrapping
//! a system-clock call) but follows the reference VM's actual native
//! table instead of the teacher's single `ClockTime` stub: `clock`,
//! `wallClock`, `printf`, and `error`, each a plain `fn` pointer matching
//! `ObjectNative`'s `(argc, args[]) -> Value` calling convention.

mod time;

use crate::value::{format_value, Value};
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_native("clock", Some(0), time::clock);
    vm.define_native("wallClock", Some(0), time::wall_clock);
    vm.define_native("printf", None, printf);
    vm.define_native("error", Some(1), error);
}

/// Prints every argument concatenated with no separator followed by a
/// newline, matching the reference VM's variadic `printf` native (distinct
/// from the `print` statement, which takes exactly one expression).
fn printf(args: &[Value]) -> Result<Value, String> {
    let rendered: Vec<String> = args.iter().map(format_value).collect();
    println!("{}", rendered.concat());
    Ok(Value::Nil)
}

fn error(args: &[Value]) -> Result<Value, String> {
    if !args[0].is_string() {
        return Err("Expected string argument.".to_string());
    }
    eprintln!("{}", format_value(&args[0]));
    Ok(Value::Nil)
}
