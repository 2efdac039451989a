use std::fmt::Write as _;

use serde::Serialize;

use crate::reload::source::ScriptSource;

/// Severity tag of one compiler message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	/// `INFO`
	Info,
	/// `WARN`
	Warning,
	/// `ERR`
	Error,
}

impl Severity {
	/// Label used in the engine stream and in corrected reports.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Info => "INFO",
			Self::Warning => "WARN",
			Self::Error => "ERR",
		}
	}

	fn parse(label: &str) -> Option<Self> {
		match label.trim() {
			"INFO" => Some(Self::Info),
			"WARN" => Some(Self::Warning),
			"ERR" => Some(Self::Error),
			_ => None,
		}
	}
}

/// One parsed compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
	/// File the message refers to; the section name until corrected.
	pub file: String,
	/// 1-based line.
	pub line: u32,
	/// 1-based column.
	pub column: u32,
	/// Message severity.
	pub severity: Severity,
	/// Message text.
	pub message: String,
}

impl Diagnostic {
	/// Parse `<section> (<line>, <col>) : <ERR|WARN|INFO> : <message>`.
	pub fn parse_line(line: &str) -> Option<Self> {
		let open = line.find(" (")?;
		let section = &line[..open];
		let rest = &line[open + 2..];
		let close = rest.find(')')?;
		let (row, col) = rest[..close].split_once(',')?;
		let rest = rest[close + 1..].trim_start().strip_prefix(':')?;
		let (label, message) = rest.split_once(" : ")?;

		Some(Self {
			file: section.trim().to_owned(),
			line: row.trim().parse().ok()?,
			column: col.trim().parse().ok()?,
			severity: Severity::parse(label)?,
			message: message.trim_end().to_owned(),
		})
	}

	/// Render as it appears in an operator report.
	pub fn render(&self) -> String {
		match self.severity {
			Severity::Info => self.message.clone(),
			severity => format!("    {}: {} ({}, {}) {}", severity.as_str(), self.file, self.line, self.column, self.message),
		}
	}
}

/// Parse every recognizable line of an engine diagnostic stream.
pub fn parse_diagnostics(stream: &str) -> Vec<Diagnostic> {
	stream.lines().filter_map(Diagnostic::parse_line).collect()
}

/// Rewrite expanded-source positions into original file names and lines.
pub fn correct_diagnostics(diagnostics: &mut [Diagnostic], source: &ScriptSource) {
	for diag in diagnostics {
		if let Some(corrected) = source.corrected_line(diag.line) {
			diag.file = corrected.dependency.file_name();
			diag.line = corrected.line;
		}
	}
}

/// Render diagnostics one per line.
pub fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
	let mut out = String::new();
	for diag in diagnostics {
		let _ = writeln!(out, "{}", diag.render());
	}
	out
}

/// Highest severity present, if any.
pub fn worst_severity(diagnostics: &[Diagnostic]) -> Option<Severity> {
	diagnostics.iter().map(|diag| diag.severity).max()
}

#[cfg(test)]
mod tests;
