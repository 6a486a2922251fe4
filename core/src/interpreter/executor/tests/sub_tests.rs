//! Tests for SUB / GOSUB / RETURN and local variables

use super::helpers::{compile_and_build_vm, compile_and_build_vm_with, run_script};
use crate::error::ErrorKind;
use crate::interpreter::executor::InterpreterConfig;
use crate::interpreter::types::Data;
use crate::interpreter::variables::Visibility;

#[test]
fn test_gosub_returns_value() {
    let mut h = run_script(
        r#"
        INTEGER n = 4
        GOSUB double
        PRINT "got <$RETVAL>"
        ENDMAIN

        SUB double
            RETURN $n * 2
        ENDSUB
        "#,
    );
    assert_eq!(h.printed(), vec!["got 8"]);
    assert_eq!(h.value("RETVAL"), Data::Int(8));
}

#[test]
fn test_main_falls_over_sub_bodies() {
    let h = run_script(
        r#"
        PRINT "start"
        SUB helper
            PRINT "inside"
        ENDSUB
        PRINT "end"
        "#,
    );
    assert_eq!(h.printed(), vec!["start", "end"]);
}

#[test]
fn test_locals_are_per_call_and_reported_as_local() {
    let mut h = compile_and_build_vm(
        r#"
        GOSUB count
        GOSUB count
        ENDMAIN
        SUB count
            INTEGER tmp = 1
            tmp += 1
            PRINT $tmp
        ENDSUB
        "#,
    );
    h.changes();
    h.run().unwrap();
    // a fresh frame each call
    assert_eq!(h.printed(), vec!["2", "2"]);

    let locals: Vec<_> = h
        .changes()
        .into_iter()
        .filter(|r| r.visibility == Visibility::OwnerLocal)
        .collect();
    assert_eq!(locals.len(), 2);
    assert!(locals.iter().all(|r| r.owner == "count" && r.name == "tmp"));
    assert!(h.vm.value("tmp").is_err());
}

#[test]
fn test_subs_can_call_subs_and_use_globals() {
    let mut h = run_script(
        r#"
        INTEGER depth = 0
        GOSUB outer
        ENDMAIN
        SUB outer
            depth += 1
            GOSUB inner
        ENDSUB
        SUB inner
            depth += 10
        ENDSUB
        "#,
    );
    assert_eq!(h.value("depth"), Data::Int(11));
    assert_eq!(h.vm.call_depth(), 0);
}

#[test]
fn test_return_inside_loop_unwinds_loop_stack() {
    let mut h = run_script(
        r#"
        INTEGER calls = 0
        FOR 2
            GOSUB find
            calls += 1
        NEXT
        ENDMAIN
        SUB find
            FOR i = 1 TO 10
                IF $i == 3
                    RETURN $i
                ENDIF
            NEXT
        ENDSUB
        "#,
    );
    assert_eq!(h.value("calls"), Data::Int(2));
    assert_eq!(h.value("RETVAL"), Data::Int(3));
}

#[test]
fn test_recursive_sub_keeps_caller_loops() {
    let mut h = run_script(
        r#"
        INTEGER depth = 0
        INTEGER visits = 0
        GOSUB walk
        ENDMAIN
        SUB walk
            depth += 1
            FOR 2
                visits += 1
                IF $depth < 2
                    GOSUB walk
                ENDIF
            NEXT
            depth -= 1
        ENDSUB
        "#,
    );
    assert_eq!(h.value("visits"), Data::Int(6));
    assert_eq!(h.value("depth"), Data::Int(0));
    assert_eq!(h.vm.call_depth(), 0);
}

#[test]
fn test_break_in_recursive_call_leaves_caller_loop_running() {
    let mut h = run_script(
        r#"
        INTEGER depth = 0
        INTEGER outer = 0
        GOSUB walk
        ENDMAIN
        SUB walk
            depth += 1
            FOR 3
                IF $depth == 1
                    outer += 1
                    GOSUB walk
                ENDIF
                BREAKIF $depth == 2
            NEXT
            depth -= 1
        ENDSUB
        "#,
    );
    assert_eq!(h.value("outer"), Data::Int(3));
    assert_eq!(h.value("depth"), Data::Int(0));
}

#[test]
fn test_recursion_hits_call_depth_limit() {
    let config = InterpreterConfig {
        max_call_depth: 5,
        random_seed: None,
    };
    let mut h = compile_and_build_vm_with(
        r#"
        GOSUB forever
        ENDMAIN
        SUB forever
            GOSUB forever
        ENDSUB
        "#,
        config,
    );
    let err = h.run().unwrap_err();
    assert_eq!(err.kind, ErrorKind::CallDepth(5));
    assert_eq!(h.vm.call_depth(), 5);
}

#[test]
fn test_exit_stops_immediately() {
    let h = run_script(
        r#"
        PRINT "a"
        EXIT
        PRINT "b"
        "#,
    );
    assert_eq!(h.printed(), vec!["a"]);
}
