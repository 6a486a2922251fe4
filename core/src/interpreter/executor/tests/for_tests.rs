//! Tests for FOR / NEXT / BREAK / SKIP and their conditional forms

use super::helpers::{compile_and_build_vm, run_script};
use crate::error::ErrorKind;
use crate::interpreter::types::Data;

#[test]
fn test_to_is_inclusive() {
    let h = run_script(
        r#"
        FOR i = 1 TO 3
            PRINT $i
        NEXT
        "#,
    );
    assert_eq!(h.printed(), vec!["1", "2", "3"]);
}

#[test]
fn test_upto_is_exclusive() {
    let h = run_script(
        r#"
        FOR i = 1 UPTO 3
            PRINT $i
        NEXT i
        "#,
    );
    assert_eq!(h.printed(), vec!["1", "2"]);
}

#[test]
fn test_negative_step_and_empty_range() {
    let h = run_script(
        r#"
        FOR i = 6 TO 0 STEP -3
            PRINT $i
        NEXT
        FOR j = 5 TO 1
            PRINT "never"
        NEXT
        PRINT "after"
        "#,
    );
    assert_eq!(h.printed(), vec!["6", "3", "0", "after"]);
}

#[test]
fn test_counted_and_nested_loops() {
    let mut h = run_script(
        r#"
        INTEGER total = 0
        FOR 3
            FOR k = 1 TO 2
                total += $k
            NEXT
        NEXT
        "#,
    );
    assert_eq!(h.value("total"), Data::Int(9));
}

#[test]
fn test_break_leaves_the_loop() {
    let mut h = run_script(
        r#"
        INTEGER last = 0
        FOR i = 1 TO 10
            BREAKIF $i == 4
            last = $i
        NEXT
        PRINT "out"
        "#,
    );
    assert_eq!(h.value("last"), Data::Int(3));
    assert_eq!(h.printed(), vec!["out"]);
}

#[test]
fn test_skip_goes_to_next() {
    let h = run_script(
        r#"
        FOR i = 1 TO 5
            SKIPIF $i % 2 == 0
            PRINT $i
        NEXT
        "#,
    );
    assert_eq!(h.printed(), vec!["1", "3", "5"]);
}

#[test]
fn test_infinite_loop_with_break() {
    let mut h = run_script(
        r#"
        INTEGER n = 0
        FOR
            n += 1
            IF $n == 5
                BREAK
            ENDIF
        NEXT
        "#,
    );
    assert_eq!(h.value("n"), Data::Int(5));
}

#[test]
fn test_zero_step_is_an_error() {
    let mut h = compile_and_build_vm(
        r#"
        INTEGER s = 0
        FOR i = 1 TO 3 STEP $s
        NEXT
        "#,
    );
    let err = h.run().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Arithmetic(_)));
    assert_eq!(err.line, Some(3));
    // pc stays on the FOR
    assert_eq!(h.vm.pc(), 1);
}

#[test]
fn test_loop_variable_changes_are_seen_by_next() {
    let h = run_script(
        r#"
        FOR i = 1 TO 10
            PRINT $i
            i += 4
        NEXT
        "#,
    );
    assert_eq!(h.printed(), vec!["1", "6"]);
}

#[test]
fn test_generated_counters_are_not_reported() {
    let mut h = compile_and_build_vm(
        r#"
        INTEGER total = 0
        FOR 2
            total += 1
        NEXT
        FOR i = 1 TO 2
            GOSUB tick
        NEXT
        ENDMAIN
        SUB tick
            FOR 3
                total += 1
            NEXT
        ENDSUB
        "#,
    );
    h.changes();
    h.run().unwrap();
    assert_eq!(h.value("total"), Data::Int(8));

    let names: Vec<String> = h.changes().into_iter().map(|r| r.name).collect();
    assert!(names.contains(&"total".to_string()));
    assert!(names.contains(&"i".to_string()));
    assert!(names.iter().all(|n| !n.starts_with("_FOR")), "reported {:?}", names);
}
