use super::{Diagnostic, Severity, parse_diagnostics, render_diagnostics, worst_severity};

#[test]
fn parses_engine_lines() {
	let diag = Diagnostic::parse_line("script (544, 20) : ERR  : Expected ';'").expect("error line parses");
	assert_eq!(diag.file, "script");
	assert_eq!(diag.line, 544);
	assert_eq!(diag.column, 20);
	assert_eq!(diag.severity, Severity::Error);
	assert_eq!(diag.message, "Expected ';'");

	let info = Diagnostic::parse_line("script (3, 1) : INFO : Compiling void main()").expect("info line parses");
	assert_eq!(info.severity, Severity::Info);
	assert_eq!(info.message, "Compiling void main()");
}

#[test]
fn ignores_unrecognized_lines() {
	let diags = parse_diagnostics("garbage\nscript (1, 2) : WARN : Unused variable\n\nscript (x, 2) : ERR : bad\n");
	assert_eq!(diags.len(), 1);
	assert_eq!(diags[0].severity, Severity::Warning);
}

#[test]
fn renders_corrected_format() {
	let diags = parse_diagnostics("script (4, 7) : ERR  : No matching symbol\nscript (4, 1) : INFO : Compiling int x\n");
	let mut diags = diags;
	diags[0].file = "main.as".to_owned();

	assert_eq!(render_diagnostics(&diags), "    ERR: main.as (4, 7) No matching symbol\nCompiling int x\n");
	assert_eq!(worst_severity(&diags), Some(Severity::Error));
	assert_eq!(worst_severity(&[]), None);
}
