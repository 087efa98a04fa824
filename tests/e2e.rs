//! Black-box end-to-end scenarios, run against `Vm::run_code` directly
//! rather than through the `dynamix` binary.

use dynamix::vm::{InterpretResult, Vm};

fn expect_ok(src: &str) {
    let mut vm = Vm::new();
    match vm.run_code("e2e", src) {
        InterpretResult::Ok => {}
        other => panic!("expected Ok, got {:?}", other),
    }
}

fn expect_runtime_error_containing(src: &str, needle: &str) {
    let mut vm = Vm::new();
    match vm.run_code("e2e", src) {
        InterpretResult::RuntimeError(err) => {
            assert!(
                err.msg.contains(needle),
                "expected runtime error containing '{}', got '{}'",
                needle,
                err.msg
            );
        }
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

fn expect_compile_error_containing(src: &str, needle: &str) {
    let mut vm = Vm::new();
    match vm.run_code("e2e", src) {
        InterpretResult::CompileError(msg) => {
            assert!(
                msg.contains(needle),
                "expected compile error containing '{}', got '{}'",
                needle,
                msg
            );
        }
        other => panic!("expected a compile error, got {:?}", other),
    }
}

#[test]
fn arithmetic_precedence_prints_seven() {
    expect_ok("print 1 + 2 * 3;");
}

#[test]
fn block_scope_shadows_then_restores_outer() {
    expect_ok("let x = 10; { let x = 20; print x; } print x;");
}

#[test]
fn while_loop_counts_to_three() {
    expect_ok("let i = 0; while i < 3 { print i; i = i + 1; }");
}

#[test]
fn string_concatenation() {
    expect_ok("print \"foo\" + \"bar\";");
}

#[test]
fn reading_undefined_global_is_a_runtime_error() {
    expect_runtime_error_containing("print x;", "undefined variable 'x'");
}

#[test]
fn uninitialized_local_self_reference_is_a_compile_error() {
    expect_compile_error_containing("{ let x = x; }", "uninitialized local variable");
}

#[test]
fn duplicate_local_declaration_in_one_block_is_a_compile_error() {
    expect_compile_error_containing("{ let x = 1; let x = 2; }", "multiple definitions");
}

#[test]
fn global_self_reference_reads_the_enclosing_scope() {
    // At file scope `x` isn't a local, so `let x = x;` reads whatever `x`
    // resolves to in the surrounding (here: outer) scope rather than
    // tripping the "uninitialized local" guard, which only applies inside
    // a block.
    expect_runtime_error_containing("let x = x;", "undefined variable 'x'");
}

#[test]
fn if_else_picks_the_right_branch() {
    expect_ok("if true { print 1; } else { print 2; }");
    expect_ok("if false { print 1; } else { print 2; }");
}

#[test]
fn for_loop_runs_its_three_clauses() {
    expect_ok("for (let i = 0; i < 3; i = i + 1) { print i; }");
}

#[test]
fn comparison_operators_compose_via_synthesis() {
    expect_ok("print 1 <= 2; print 2 >= 1; print 1 != 2;");
}
