//! Tests for declarations, SET and change reporting

use super::helpers::{compile_and_build_vm, compile_and_build_vm_with, run_script};
use crate::error::ErrorKind;
use crate::interpreter::executor::InterpreterConfig;
use crate::interpreter::types::Data;
use crate::interpreter::variables::{Visibility, Writer};

// ============================================================================
// Assignment
// ============================================================================

#[test]
fn test_arithmetic_assignment() {
    let mut h = run_script(
        r#"
        SET $a = 3
        SET $total = ($a + 4) * 2
        x = 3 + 4 * 2
        x -= 1
        "#,
    );
    assert_eq!(h.value("total"), Data::Int(14));
    assert_eq!(h.value("x"), Data::Int(10));
}

#[test]
fn test_unsigned_rotation() {
    let mut h = run_script("UNSIGNED m = ROL 0x80000000 1\nUNSIGNED n = !0");
    assert_eq!(h.value("m"), Data::UInt(1));
    assert_eq!(h.value("n"), Data::UInt(u32::MAX));
}

#[test]
fn test_inferred_unsigned_targets() {
    let mut h = run_script("SET $m = ROL 0x80000000 1
bits = 0xF0 AND 0x3C
SET $low = !($bits OR 0xFF)");
    assert_eq!(h.value("m"), Data::UInt(1));
    assert_eq!(h.value("bits"), Data::UInt(0x30));
    assert_eq!(h.value("low"), Data::UInt(0xFFFF_FF00));
}

#[test]
fn test_strings_concat_and_templates() {
    let mut h = run_script(
        r#"
        STRING who = "world"
        INTEGER count = 3
        STRING greeting = "Hello " + $who + "!"
        greeting += " x" + $count
        PRINT "Hello <$who>" $count
        PRINT "<$missing_bracket"
        "#,
    );
    assert_eq!(h.value("greeting"), Data::Str("Hello world! x3".into()));
    assert_eq!(h.printed(), vec!["Hello world 3", "<$missing_bracket"]);
}

#[test]
fn test_indexing_and_suffixes() {
    let mut h = run_script(
        r#"
        STRARRAY names = {"ada", "grace", "linus"}
        INTEGER i = 1
        STRING second = $names[$i]
        STRARRAY head = $names[0:2]
        INTEGER n = $names.SIZE
        STRING shout = $second.UPPER
        BOOLEAN empty = $head.ISEMPTY
        "#,
    );
    assert_eq!(h.value("second"), Data::Str("grace".into()));
    assert_eq!(
        h.value("head"),
        Data::StrArray(vec!["ada".into(), "grace".into()])
    );
    assert_eq!(h.value("n"), Data::Int(3));
    assert_eq!(h.value("shout"), Data::Str("GRACE".into()));
    assert_eq!(h.value("empty"), Data::Bool(false));
}

#[test]
fn test_index_out_of_range() {
    let mut h = compile_and_build_vm("INTARRAY xs = {1, 2}\nINTEGER y = $xs[5]");
    let err = h.run().unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::IndexOutOfRange {
            name: "xs".into(),
            index: 5,
            len: 2
        }
    );
}

#[test]
fn test_division_by_zero_leaves_target_unmodified() {
    let mut h = compile_and_build_vm(
        r#"
        INTEGER x = 7
        INTEGER zero = 0
        SET $x = 10 / $zero
        "#,
    );
    let err = h.run().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Arithmetic(_)));
    assert_eq!(err.line, Some(4));
    assert!(err.to_string().starts_with("line 4: SET: "));
    assert_eq!(h.value("x"), Data::Int(7));
    assert_eq!(h.vm.pc(), 2);
}

#[test]
fn test_negative_into_unsigned_fails() {
    let mut h = compile_and_build_vm("UNSIGNED u = 1\nINTEGER i = -5\nu = $i");
    assert!(h.run().is_err());
    assert_eq!(h.value("u"), Data::UInt(1));
}

// ============================================================================
// Reserved variables
// ============================================================================

#[test]
fn test_random_is_seeded() {
    let config = || InterpreterConfig {
        max_call_depth: 8,
        random_seed: Some(7),
    };
    let source = "INTEGER a = $RANDOM\nINTEGER b = $RANDOM";
    let mut first = compile_and_build_vm_with(source, config());
    let mut second = compile_and_build_vm_with(source, config());
    first.run().unwrap();
    second.run().unwrap();
    assert_eq!(first.value("a"), second.value("a"));
    assert_eq!(first.value("b"), second.value("b"));
}

#[test]
fn test_reset_reports_scriptname_and_curdir() {
    let mut h = compile_and_build_vm("INTEGER x = 1");
    let names: Vec<String> = h.changes().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["CURDIR", "SCRIPTNAME"]);
    assert_eq!(h.value("SCRIPTNAME"), Data::Str("test.ss".into()));
    assert_eq!(h.value("CURDIR"), Data::Str("/".into()));
}

// ============================================================================
// Change tracking
// ============================================================================

#[test]
fn test_writes_are_reported_once() {
    let mut h = compile_and_build_vm(
        r#"
        INTEGER x = 1
        x = 1
        "#,
    );
    h.changes();

    h.step().unwrap();
    let reports = h.changes();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].name, "x");
    assert_eq!(reports[0].visibility, Visibility::Global);
    assert_eq!(reports[0].writer, Some(Writer { index: 0, line: 2 }));
    assert!(h.changes().is_empty());

    // same value, still a write
    h.step().unwrap();
    let reports = h.changes();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].writer, Some(Writer { index: 1, line: 3 }));
    assert!(reports[0].to_string().starts_with("[VAR GLOBAL :: MAIN :: x :: Integer :: 1 :: 1 :: 3 :: "));
}
