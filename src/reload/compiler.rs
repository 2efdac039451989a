use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::reload::cache::{self, CACHE_FORMAT_VERSION, CacheKey};
use crate::reload::config::ReloadConfig;
use crate::reload::diag::{Diagnostic, Severity, correct_diagnostics, parse_diagnostics, render_diagnostics, worst_severity};
use crate::reload::runtime::ScriptEngine;
use crate::reload::source::{ScriptSource, SourceLoader};
use crate::reload::{ReloadError, Result};

/// Section name the expanded text is added under.
pub const SCRIPT_SECTION: &str = "script";

/// What the operator wants after seeing a compile report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorChoice {
	/// Reload the source and compile again.
	Retry,
	/// Give up on this build.
	Accept,
	/// Use the module despite its warnings.
	Continue,
}

/// Whether a report carries errors or only warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
	/// Compilation failed.
	Errors,
	/// Compilation succeeded with warnings.
	Warnings,
}

/// Diagnostics shown to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
	/// Errors or warnings.
	pub kind: ReportKind,
	/// E.g. `Error in "main.as" from mod core`.
	pub title: String,
	/// Mod pollution lines followed by corrected diagnostics.
	pub details: String,
	/// Corrected diagnostics.
	pub diagnostics: Vec<Diagnostic>,
}

/// Receives compile reports and decides how to proceed.
pub trait Operator {
	/// Review one report. Blocks until the operator answers.
	fn review(&mut self, report: &CompileReport) -> OperatorChoice;
}

/// Operator that never retries: errors fail, warnings continue.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Operator for NonInteractive {
	fn review(&mut self, report: &CompileReport) -> OperatorChoice {
		match report.kind {
			ReportKind::Errors => OperatorChoice::Accept,
			ReportKind::Warnings => OperatorChoice::Continue,
		}
	}
}

/// Where a built module came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleOrigin {
	/// Loaded from a matching cache entry.
	Cache,
	/// Compiled from source.
	Source,
}

/// Outcome of the cache step of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheStatus {
	/// Caching is switched off.
	Disabled,
	/// Module was loaded from cache.
	Hit,
	/// Fresh entry was written.
	Written,
	/// Writing the entry failed; the build still succeeded.
	WriteFailed {
		/// Failure description.
		message: String,
	},
}

/// A module ready to take over.
#[derive(Debug)]
pub struct Compiled<M> {
	/// Built module.
	pub module: M,
	/// Expanded source it was built from.
	pub source: ScriptSource,
	/// Cache or compiler.
	pub origin: ModuleOrigin,
	/// Cache step outcome.
	pub cache: CacheStatus,
	/// Corrected diagnostics of the successful build.
	pub diagnostics: Vec<Diagnostic>,
}

/// Turns script files into modules through the bytecode cache.
#[derive(Debug, Clone)]
pub struct Compiler {
	config: ReloadConfig,
	loader: SourceLoader,
}

impl Compiler {
	/// Compiler using `loader` for sources.
	pub fn new(config: ReloadConfig, loader: SourceLoader) -> Self {
		let loader = loader.with_include_markers(config.dump_include_scripts);
		Self { config, loader }
	}

	/// Active configuration.
	pub fn config(&self) -> &ReloadConfig {
		&self.config
	}

	/// Source loader.
	pub fn loader(&self) -> &SourceLoader {
		&self.loader
	}

	/// Build the script at `path`, preferring a matching cache entry.
	pub fn build<E: ScriptEngine>(&self, engine: &mut E, operator: &mut dyn Operator, path: &Path) -> Result<Compiled<E::Module>> {
		loop {
			let source = self.loader.load(path)?;
			self.dump_expanded(&source);

			if self.config.cache_enabled {
				if let Some(module) = self.load_cached(engine, &source) {
					return Ok(Compiled {
						module,
						source,
						origin: ModuleOrigin::Cache,
						cache: CacheStatus::Hit,
						diagnostics: Vec::new(),
					});
				}
			}

			let file = source.file_name();
			let mut module = engine.create_module(&file);
			add_section(engine, &mut module, &file, &source.text)?;
			let output = engine.build(&mut module);
			let mut diagnostics = parse_diagnostics(&output.messages);
			correct_diagnostics(&mut diagnostics, &source);
			let worst = worst_severity(&diagnostics);

			if !output.success || worst == Some(Severity::Error) {
				let report = self.report(ReportKind::Errors, &source, diagnostics);
				error!("{}\n{}", report.title, report.details);
				match operator.review(&report) {
					OperatorChoice::Retry => continue,
					OperatorChoice::Accept | OperatorChoice::Continue => {
						return Err(ReloadError::CompileFailed {
							title: report.title,
							details: report.details,
						});
					}
				}
			}

			if worst == Some(Severity::Warning) {
				let report = self.report(ReportKind::Warnings, &source, diagnostics.clone());
				warn!("{}\n{}", report.title, report.details);
				match operator.review(&report) {
					OperatorChoice::Retry => continue,
					OperatorChoice::Accept => {
						return Err(ReloadError::CompileRejected {
							title: report.title,
							details: report.details,
						});
					}
					OperatorChoice::Continue => {}
				}
			}

			let cache = if self.config.cache_enabled { self.store_cached(engine, &module, &source) } else { CacheStatus::Disabled };
			return Ok(Compiled {
				module,
				source,
				origin: ModuleOrigin::Source,
				cache,
				diagnostics,
			});
		}
	}

	/// Compile ad hoc text without includes or cache.
	pub fn build_text<E: ScriptEngine>(&self, engine: &mut E, operator: &mut dyn Operator, name: &str, text: &str) -> Result<E::Module> {
		loop {
			let mut module = engine.create_module(name);
			add_section(engine, &mut module, name, text)?;
			let output = engine.build(&mut module);
			let diagnostics = parse_diagnostics(&output.messages);
			let worst = worst_severity(&diagnostics);

			let kind = if !output.success || worst == Some(Severity::Error) {
				ReportKind::Errors
			} else if worst == Some(Severity::Warning) {
				ReportKind::Warnings
			} else {
				return Ok(module);
			};

			let report = CompileReport {
				kind,
				title: title(kind, name, "core"),
				details: render_diagnostics(&diagnostics),
				diagnostics,
			};
			match (kind, operator.review(&report)) {
				(_, OperatorChoice::Retry) => continue,
				(ReportKind::Warnings, OperatorChoice::Continue) => return Ok(module),
				(ReportKind::Warnings, OperatorChoice::Accept) => {
					return Err(ReloadError::CompileRejected {
						title: report.title,
						details: report.details,
					});
				}
				(ReportKind::Errors, _) => {
					return Err(ReloadError::CompileFailed {
						title: report.title,
						details: report.details,
					});
				}
			}
		}
	}

	fn report(&self, kind: ReportKind, source: &ScriptSource, diagnostics: Vec<Diagnostic>) -> CompileReport {
		let mut details = String::new();
		if self.config.list_include_files_when_logging_mod_errors {
			for line in source.mod_pollution() {
				details.push_str(&line);
				details.push('\n');
			}
		}
		details.push_str(&render_diagnostics(&diagnostics));

		CompileReport {
			kind,
			title: title(kind, &source.file_name(), source.root().mod_label()),
			details,
			diagnostics,
		}
	}

	fn load_cached<E: ScriptEngine>(&self, engine: &mut E, source: &ScriptSource) -> Option<E::Module> {
		let path = self.config.cache_path(&source.relative);
		let entry = match cache::read_entry(&path) {
			Ok(Some(entry)) => entry,
			Ok(None) => {
				debug!(path = %path.display(), "no cached bytecode");
				return None;
			}
			Err(err) => {
				warn!(path = %path.display(), "unreadable cache entry: {err}");
				return None;
			}
		};

		if entry.key.version != CACHE_FORMAT_VERSION {
			info!(path = %path.display(), found = entry.key.version, "cache base version outdated, recompiling");
			return None;
		}
		if entry.key != CacheKey::current(&self.config.build_id, source.hash) {
			info!(path = %path.display(), "cached bytecode appears outdated, recompiling");
			return None;
		}

		let mut module = engine.create_module(&source.file_name());
		match engine.load_bytecode(&mut module, &entry.payload) {
			Ok(()) => {
				info!(path = %path.display(), "loaded module from cached bytecode");
				Some(module)
			}
			Err(err) => {
				warn!(path = %path.display(), "failed to load cached bytecode: {err}");
				None
			}
		}
	}

	fn store_cached<E: ScriptEngine>(&self, engine: &E, module: &E::Module, source: &ScriptSource) -> CacheStatus {
		let path = self.config.cache_path(&source.relative);
		let key = CacheKey::current(&self.config.build_id, source.hash);
		let written = engine.save_bytecode(module).and_then(|bytes| cache::write_entry(&path, &key, &bytes));

		match written {
			Ok(()) => {
				debug!(path = %path.display(), "wrote cached bytecode");
				CacheStatus::Written
			}
			Err(err) => {
				if threatens_further_writes(&err) {
					error!(path = %path.display(), "unable to save script bytecode: {err}");
				} else {
					warn!(path = %path.display(), "unable to save script bytecode: {err}");
				}
				CacheStatus::WriteFailed { message: err.to_string() }
			}
		}
	}

	fn dump_expanded(&self, source: &ScriptSource) {
		if !self.config.dump_include_scripts {
			return;
		}

		let path = self.config.dump_path(&source.relative);
		let written = path.parent().map_or(Ok(()), |dir| fs::create_dir_all(dir)).and_then(|()| fs::write(&path, &source.text));
		if let Err(err) = written {
			warn!(path = %path.display(), "failed to dump expanded script: {err}");
		}
	}
}

fn add_section<E: ScriptEngine>(engine: &mut E, module: &mut E::Module, file: &str, text: &str) -> Result<()> {
	engine.add_section(module, SCRIPT_SECTION, text).map_err(|err| {
		error!(file, "Unrecoverable error adding script section: {err}");
		ReloadError::AddSection {
			file: file.to_owned(),
			message: err.to_string(),
		}
	})
}

fn title(kind: ReportKind, file: &str, mod_label: &str) -> String {
	let head = match kind {
		ReportKind::Errors => "Error",
		ReportKind::Warnings => "Warnings",
	};
	format!("{head} in \"{file}\" from mod {mod_label}")
}

fn threatens_further_writes(err: &ReloadError) -> bool {
	matches!(
		err,
		ReloadError::Io(source) if matches!(source.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound | io::ErrorKind::ReadOnlyFilesystem | io::ErrorKind::NotADirectory)
	)
}
