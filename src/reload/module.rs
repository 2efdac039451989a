use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info};

use crate::reload::capture::snapshot_globals;
use crate::reload::compiler::{CacheStatus, Compiler, ModuleOrigin, NonInteractive, Operator};
use crate::reload::host::HostTypeRegistry;
use crate::reload::restore::{RestoreReport, restore_globals};
use crate::reload::runtime::ScriptEngine;
use crate::reload::source::{CorrectedLine, ScriptSource};
use crate::reload::{ReloadError, Result};

/// Lifecycle of the hosted module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadState {
	/// Nothing compiled yet.
	Unloaded,
	/// A module is live.
	Loaded,
	/// Globals are being snapshotted.
	Capturing,
	/// The replacement module is being built.
	Compiling,
	/// The snapshot is being written into the replacement.
	Restoring,
}

/// Result of a successful [`ModuleHost::recompile`].
#[derive(Debug)]
pub struct ReloadOutcome {
	/// Restore summary.
	pub report: RestoreReport,
	/// Where the new module came from.
	pub origin: ModuleOrigin,
	/// Cache step outcome.
	pub cache: CacheStatus,
}

/// Owns one live script module and swaps it on reload while keeping its globals.
pub struct ModuleHost<E: ScriptEngine> {
	engine: E,
	compiler: Compiler,
	registry: HostTypeRegistry,
	operator: Box<dyn Operator>,
	module: Option<E::Module>,
	source: Option<ScriptSource>,
	script_path: Option<PathBuf>,
	state: ReloadState,
}

impl<E: ScriptEngine> ModuleHost<E> {
	/// Host with the default host type registry and a non-interactive operator.
	pub fn new(engine: E, compiler: Compiler) -> Self {
		Self {
			engine,
			compiler,
			registry: HostTypeRegistry::with_defaults(),
			operator: Box::new(NonInteractive),
			module: None,
			source: None,
			script_path: None,
			state: ReloadState::Unloaded,
		}
	}

	/// Replace the host type registry.
	pub fn with_registry(mut self, registry: HostTypeRegistry) -> Self {
		self.registry = registry;
		self
	}

	/// Replace the operator that answers compile reports.
	pub fn with_operator(mut self, operator: impl Operator + 'static) -> Self {
		self.operator = Box::new(operator);
		self
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ReloadState {
		self.state
	}

	/// Live module.
	pub fn module(&self) -> Option<&E::Module> {
		self.module.as_ref()
	}

	/// Live module, mutable.
	pub fn module_mut(&mut self) -> Option<&mut E::Module> {
		self.module.as_mut()
	}

	/// Scripting engine.
	pub fn engine(&self) -> &E {
		&self.engine
	}

	/// Host type registry.
	pub fn registry(&self) -> &HostTypeRegistry {
		&self.registry
	}

	/// Expanded source of the live module, when compiled from a file.
	pub fn source(&self) -> Option<&ScriptSource> {
		self.source.as_ref()
	}

	/// Compile the script at `path` and make it the live module. Globals start fresh.
	pub fn compile_script(&mut self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref().to_path_buf();
		let compiled = self.compiler.build(&mut self.engine, self.operator.as_mut(), &path)?;
		info!(path = %path.display(), origin = ?compiled.origin, "script module loaded");

		self.module = Some(compiled.module);
		self.source = Some(compiled.source);
		self.script_path = Some(path);
		self.state = ReloadState::Loaded;
		Ok(())
	}

	/// Compile ad hoc text into the live module, discarding previous globals.
	pub fn compile_from_text(&mut self, text: &str) -> Result<()> {
		let module = self.compiler.build_text(&mut self.engine, self.operator.as_mut(), "console", text)?;
		self.module = Some(module);
		self.source = None;
		self.script_path = None;
		self.state = ReloadState::Loaded;
		Ok(())
	}

	/// Rebuild the live script and carry its globals over.
	///
	/// On failure the previous module stays live and untouched.
	pub fn recompile(&mut self) -> Result<ReloadOutcome> {
		let Some(path) = self.script_path.clone() else {
			return Err(ReloadError::NoScriptLoaded);
		};
		let Some(old) = self.module.as_ref() else {
			return Err(ReloadError::NoScriptLoaded);
		};

		self.state = ReloadState::Capturing;
		let snapshot = snapshot_globals(old, &self.registry);

		self.state = ReloadState::Compiling;
		let compiled = match self.compiler.build(&mut self.engine, self.operator.as_mut(), &path) {
			Ok(compiled) => compiled,
			Err(err) => {
				error!(path = %path.display(), "reload aborted, keeping previous module: {err}");
				drop(snapshot);
				self.state = ReloadState::Loaded;
				return Err(err);
			}
		};

		self.state = ReloadState::Restoring;
		let mut module = compiled.module;
		let report = restore_globals(snapshot, &mut module, &self.registry);
		drop(self.module.replace(module));
		self.source = Some(compiled.source);
		self.state = ReloadState::Loaded;

		info!(
			path = %path.display(),
			restored = report.restored_globals,
			vanished = report.vanished_globals.len(),
			issues = report.issues.len(),
			"script module reloaded"
		);
		Ok(ReloadOutcome {
			report,
			origin: compiled.origin,
			cache: compiled.cache,
		})
	}

	/// Whether any source file of the live module changed on disk since it was loaded.
	pub fn source_changed(&self) -> bool {
		self.source.as_ref().is_some_and(|source| self.compiler.loader().changed_since(source))
	}

	/// Map a line of the expanded source back to its file and line.
	pub fn corrected_line(&self, line: u32) -> Option<CorrectedLine<'_>> {
		self.source.as_ref()?.corrected_line(line)
	}

	/// Text dump of the live globals.
	pub fn globals_dump(&self) -> String {
		match &self.module {
			Some(module) => snapshot_globals(module, &self.registry).render(),
			None => String::new(),
		}
	}

	/// JSON dump of the live globals and the instances they reach.
	pub fn globals_json(&self) -> serde_json::Value {
		match &self.module {
			Some(module) => serde_json::to_value(snapshot_globals(module, &self.registry)).unwrap_or(serde_json::Value::Null),
			None => serde_json::Value::Null,
		}
	}
}
