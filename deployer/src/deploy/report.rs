//! Human-readable reports of captured process output

/// Indentation applied to every reported line
pub const INDENT: &str = "    ";

/// Format captured output under a header line.
///
/// Every `\n`-separated segment becomes one indented line, so output ending in
/// a newline yields a final indent-only line. Returns `None` for empty output.
/// Invalid UTF-8 is replaced, never rejected.
pub fn format_output(label: &str, output: &[u8]) -> Option<String> {
    if output.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(output);
    let mut report = String::with_capacity(label.len() + output.len() + 16);
    report.push_str(label);
    report.push('\n');
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        report.push_str(INDENT);
        report.push_str(line);
        report.push('\n');
    }
    report.push('\n');

    Some(report)
}

/// Print captured output to stdout; prints nothing for empty output
pub fn print_output(label: &str, output: &[u8]) {
    if let Some(report) = format_output(label, output) {
        print!("{}", report);
    }
}
