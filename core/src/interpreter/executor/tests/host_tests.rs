//! Tests for collaborator commands and STATUS/RESPONSE reporting

use super::helpers::{compile_and_build_vm, run_script};
use crate::error::ErrorKind;
use crate::interpreter::types::Data;

fn strs(v: &[&str]) -> Data {
    Data::StrArray(v.iter().map(|s| s.to_string()).collect())
}

#[test]
fn test_file_write_then_read() {
    let mut h = run_script(
        r#"
        FOPEN "notes.txt" "w"
        FWRITE "first" 1
        FWRITE "second"
        FCLOSE
        FOPEN "notes.txt"
        FREAD
        STRING line = $RESPONSE[0]
        "#,
    );
    assert_eq!(h.value("STATUS"), Data::Int(0));
    assert_eq!(h.value("line"), Data::Str("first 1".into()));
}

#[test]
fn test_read_past_end_sets_status() {
    let mut h = run_script(
        r#"
        FOPEN "empty.txt" "w"
        FCLOSE
        FOPEN "empty.txt"
        FREAD
        PRINT $STATUS $RESPONSE[0]
        "#,
    );
    assert_eq!(h.value("STATUS"), Data::Int(-1));
    assert_eq!(h.printed(), vec!["-1 end of file"]);
}

#[test]
fn test_failure_then_success_resets_status() {
    let mut h = run_script(
        r#"
        FCLOSE
        INTEGER failed = $STATUS
        MKDIR "out"
        "#,
    );
    assert_eq!(h.value("failed"), Data::Int(-1));
    assert_eq!(h.value("STATUS"), Data::Int(0));
}

#[test]
fn test_directories_and_listing() {
    let mut h = run_script(
        r#"
        MKDIR "reports"
        CD "reports"
        FOPEN "a.csv" "w"
        FCLOSE
        FOPEN "b.txt" "w"
        FCLOSE
        FLIST "*.csv"
        "#,
    );
    assert_eq!(h.value("CURDIR"), Data::Str("/reports".into()));
    assert_eq!(h.value("RESPONSE"), strs(&["a.csv"]));
}

#[test]
fn test_bad_list_pattern_is_soft() {
    let mut h = run_script(
        r#"
        FLIST "[a-"
        INTEGER failed = $STATUS
        FLIST "*"
        "#,
    );
    assert_eq!(h.value("failed"), Data::Int(-1));
    assert_eq!(h.value("STATUS"), Data::Int(0));
}

#[test]
fn test_path_escape_aborts() {
    let mut h = compile_and_build_vm("INTEGER x = 1\nCD \"../..\"\nx = 2");
    let err = h.run().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::PathEscape(_)));
    assert_eq!(err.line, Some(2));
    assert_eq!(h.value("x"), Data::Int(1));
}

#[test]
fn test_sheet_queries() {
    let mut h = run_script(
        r#"
        CELL 2 2
        STRING who = $RESPONSE[0]
        ROW 1
        STRARRAY header = $RESPONSE
        COLUMN 2
        "#,
    );
    assert_eq!(h.value("who"), Data::Str("ada".into()));
    assert_eq!(h.value("header"), strs(&["id", "name"]));
    assert_eq!(h.value("RESPONSE"), strs(&["name", "ada", "grace"]));
}

#[test]
fn test_text_sources() {
    let mut h = run_script(
        r#"
        CLIPBOARD
        STRING copied = $RESPONSE[0]
        PDF "missing.pdf"
        OCR "scan.png"
        "#,
    );
    assert_eq!(h.value("copied"), Data::Str("copied".into()));
    assert_eq!(h.value("STATUS"), Data::Int(0));
    assert_eq!(h.value("OCRTEXT"), Data::Str("text of scan.png".into()));
}

#[test]
fn test_pdf_failure_is_soft() {
    let mut h = run_script("PDF \"missing.pdf\"\nINTEGER after = $STATUS");
    assert_eq!(h.value("after"), Data::Int(-1));
    let response = h.value("RESPONSE");
    match response {
        Data::StrArray(lines) => assert!(lines[0].contains("cannot read missing.pdf")),
        other => panic!("unexpected RESPONSE {:?}", other),
    }
}

#[test]
fn test_option_command() {
    let mut h = run_script("-beep 2\n-title \"report\"");
    assert_eq!(h.printed(), vec!["-beep 2", "-title report"]);
    assert_eq!(h.value("RESPONSE"), strs(&["title"]));
}

#[test]
fn test_filter_on_response() {
    let mut h = run_script(
        r#"
        COLUMN 2
        FILTER $RESPONSE NOT == "name"
        INTEGER n = $RESPONSE.SIZE
        "#,
    );
    assert_eq!(h.value("n"), Data::Int(2));
}
