use std::path::PathBuf;

use thiserror::Error;

/// Crate-local result type.
pub type Result<T> = std::result::Result<T, ReloadError>;

/// Errors produced while loading sources, compiling modules, and reading caches.
///
/// Snapshot and restore never surface these: they log and report instead.
#[derive(Debug, Error)]
pub enum ReloadError {
	/// Filesystem or stream IO failure.
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	/// Config file could not be parsed.
	#[error("invalid config {path}: {source}")]
	Config {
		/// Config file path.
		path: PathBuf,
		/// Underlying JSON error.
		source: serde_json::Error,
	},
	/// Script path did not resolve against any source root.
	#[error("script not found: {path}")]
	ScriptNotFound {
		/// Requested script path.
		path: PathBuf,
	},
	/// Script file existed but held no text.
	#[error("script file is empty: {path}")]
	EmptyScript {
		/// Resolved script path.
		path: PathBuf,
	},
	/// Cache file was shorter than its fixed header.
	#[error("cache header truncated: need {need} bytes, have {have}")]
	CacheTruncated {
		/// Required header bytes.
		need: usize,
		/// Available bytes.
		have: usize,
	},
	/// Cache payload decompression exceeded the safety limit.
	#[error("cache payload exceeded limit {limit} bytes")]
	CachePayloadTooLarge {
		/// Maximum allowed payload bytes.
		limit: usize,
	},
	/// Build identifier does not fit the fixed-width header field.
	#[error("build id is {len} bytes, cache header allows {max}")]
	BuildIdTooLong {
		/// Build id length in bytes.
		len: usize,
		/// Header field width.
		max: usize,
	},
	/// Script text could not be handed to the compiler.
	#[error("adding script section for {file} failed: {message}")]
	AddSection {
		/// Display name of the script.
		file: String,
		/// Engine-provided message.
		message: String,
	},
	/// Compilation reported errors and the operator did not retry.
	#[error("{title}")]
	CompileFailed {
		/// Report title, e.g. `Error in "main.as" from mod core`.
		title: String,
		/// Corrected diagnostic text.
		details: String,
	},
	/// Compilation produced warnings and the operator refused to continue.
	#[error("{title} (not accepted)")]
	CompileRejected {
		/// Report title.
		title: String,
		/// Corrected diagnostic text.
		details: String,
	},
	/// The scripting engine failed an operation outside of compilation.
	#[error("engine {op} failed: {message}")]
	Engine {
		/// Engine operation name.
		op: &'static str,
		/// Engine-provided message.
		message: String,
	},
	/// Expanded line number past the end of the script.
	#[error("line {line} is outside the expanded script ({lines} lines)")]
	LineOutOfRange {
		/// Requested 1-based line.
		line: u32,
		/// Expanded line count.
		lines: usize,
	},
	/// Recompile was requested before any script was compiled from a path.
	#[error("no script loaded")]
	NoScriptLoaded,
}

impl ReloadError {
	/// Construct an engine failure for operation `op`.
	pub fn engine(op: &'static str, message: impl Into<String>) -> Self {
		Self::Engine { op, message: message.into() }
	}

	/// Whether this error is an unrecoverable configuration failure.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::AddSection { .. })
	}
}
