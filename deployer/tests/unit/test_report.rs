//! Output report tests

use acsdeploy::deploy::report::{format_output, INDENT};

#[test]
fn test_report_layout() {
    let report = format_output("Stdout:", b"Mounting share on 10.0.0.4\nMounted\n").unwrap();
    assert_eq!(
        report,
        "Stdout:\n    Mounting share on 10.0.0.4\n    Mounted\n    \n\n"
    );
}

#[test]
fn test_empty_stream_prints_nothing() {
    assert!(format_output("Stderr:", b"").is_none());
}

#[test]
fn test_invalid_utf8_is_replaced() {
    let report = format_output("Stderr:", b"bad \xff byte").unwrap();
    assert!(report.starts_with("Stderr:\n    bad "));
    assert!(report.contains('\u{FFFD}'));
}

#[test]
fn test_one_indented_line_per_segment() {
    for output in [&b"one"[..], b"one\n", b"one\r\ntwo", b"\n\n"] {
        let report = format_output("Stdout:", output).unwrap();
        let segments = output.split(|b| *b == b'\n').count();
        let indented = report
            .lines()
            .filter(|line| line.starts_with(INDENT))
            .count();
        assert_eq!(indented, segments, "{:?}", report);
    }
}
