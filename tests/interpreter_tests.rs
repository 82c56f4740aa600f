//! End-to-end scenarios from spec.md §8, run through the actual host
//! binary so stdout/stderr/exit-code all get exercised the way a real
//! invocation would, plus a few library-level checks for properties that
//! don't show up on stdout (closure/upvalue sharing, GC survival).

use std::io::Write;
use std::process::Command;

use dynac::vm::{InterpretResult, Vm};

fn script_path(name: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("dynac_test_{name}_{}.lox", std::process::id()));
    path
}

struct Run {
    stdout: String,
    stderr: String,
    status: i32,
}

fn run(name: &str, source: &str) -> Run {
    let path = script_path(name);
    let mut file = std::fs::File::create(&path).expect("create temp script");
    file.write_all(source.as_bytes()).expect("write temp script");
    drop(file);

    let output = Command::new(env!("CARGO_BIN_EXE_dynac"))
        .arg(&path)
        .output()
        .expect("run dynac binary");

    std::fs::remove_file(&path).ok();

    Run {
        stdout: String::from_utf8(output.stdout).expect("stdout is utf8"),
        stderr: String::from_utf8(output.stderr).expect("stderr is utf8"),
        status: output.status.code().expect("process exits with a code"),
    }
}

#[test]
fn arithmetic_precedence() {
    let result = run("arithmetic", "print 1 + 2 * 3;");
    assert_eq!(result.stdout, "7\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.status, 0);
}

#[test]
fn string_concatenation() {
    let result = run("concat", "var a = \"a\"; var b = \"b\"; print a + b;");
    assert_eq!(result.stdout, "ab\n");
    assert_eq!(result.status, 0);
}

#[test]
fn recursive_fibonacci() {
    let source = "fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2);} print fib(10);";
    let result = run("fib", source);
    assert_eq!(result.stdout, "55\n");
    assert_eq!(result.status, 0);
}

#[test]
fn inheritance_dispatches_to_subclass_method() {
    let source = "class A{ greet(){ print \"hi\";}} class B<A{} B().greet();";
    let result = run("inherit", source);
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.status, 0);
}

#[test]
fn list_push_and_size_and_index() {
    let source = "var l=[1,2,3]; l.push(4); print l.size(); print l[3];";
    let result = run("list", source);
    assert_eq!(result.stdout, "4\n4\n");
    assert_eq!(result.status, 0);
}

#[test]
fn map_index_assignment_and_has() {
    let source = "var m={}; m[\"k\"]=\"v\"; print m.has(\"k\"); print m[\"k\"];";
    let result = run("map", source);
    assert_eq!(result.stdout, "true\nv\n");
    assert_eq!(result.status, 0);
}

#[test]
fn list_index_out_of_bounds_is_a_runtime_error() {
    let source = "var l=[1,2]; print l[2];";
    let result = run("oob", source);
    assert!(
        result.stderr.contains("List index (2) out of bounds (2)"),
        "unexpected stderr: {}",
        result.stderr
    );
    assert_eq!(result.status, 70);
    assert_eq!(result.stdout, "");
}

#[test]
fn undefined_variable_is_a_runtime_error_with_exit_70() {
    let result = run("undef", "print nope;");
    assert_eq!(result.status, 70);
    assert!(result.stderr.contains("Undefined variable 'nope'"));
}

#[test]
fn too_many_parameters_is_a_compile_error_with_exit_65() {
    let params: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
    let source = format!("fun f({}) {{}}", params.join(", "));
    let result = run("arity", &source);
    assert_eq!(result.status, 65);
}

#[test]
fn missing_script_argument_is_a_file_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_dynac"))
        .output()
        .expect("run dynac binary with no args");
    assert_eq!(output.status.code(), Some(74));
}

// --- library-level checks for properties that never reach stdout ---

#[test]
fn closure_sees_mutation_through_shared_upvalue() {
    let mut vm = Vm::new();
    let source = "fun make() { var x = 0; fun get() { return x; } fun inc() { x = x + 1; } return [get, inc]; }\nvar pair = make();\nvar get = pair[0];\nvar inc = pair[1];\ninc();\ninc();\nif (get() != 2) { print \"FAIL\"; } else { print \"OK\"; }";
    assert_eq!(vm.interpret(source), InterpretResult::Ok);
}

#[test]
fn field_shadows_method_of_the_same_name() {
    let mut vm = Vm::new();
    let source = "class Box { value() { return \"method\"; } }\nvar b = Box();\nb.value = \"field\";\nif (b.value != \"field\") { print \"FAIL\"; } else { print \"OK\"; }";
    assert_eq!(vm.interpret(source), InterpretResult::Ok);
}

#[test]
fn and_or_short_circuit() {
    let mut vm = Vm::new();
    let source = "fun boom() { print \"called\"; return true; }\nfalse and boom();\ntrue or boom();\nprint \"done\";";
    assert_eq!(vm.interpret(source), InterpretResult::Ok);
}

#[test]
fn self_inheritance_is_rejected_at_compile_time() {
    let mut vm = Vm::new();
    assert_eq!(vm.interpret("class A < A {}"), InterpretResult::CompileError);
}

#[test]
fn empty_list_and_string_and_zero_are_truthy() {
    let mut vm = Vm::new();
    let source = "if (!0) { print \"FAIL\"; } if (!\"\") { print \"FAIL\"; } if (![]) { print \"FAIL\"; } print \"OK\";";
    assert_eq!(vm.interpret(source), InterpretResult::Ok);
}
