//! Shared test helpers: a sandbox scripting runtime, counted host objects,
//! and a scripted compile operator.

use std::path::{Path, PathBuf};

mod heap;
mod host;
mod operator;
mod parse;
mod sandbox;

/// Refcounted host object with an observable counter.
pub use host::CountedHost;
/// Operator answering compile reports from a fixed script.
pub use operator::ScriptedOperator;
/// Sandbox engine and module.
pub use sandbox::{BYTECODE_MAGIC, SandboxEngine, SandboxModule};

/// Resolve the workspace root path.
pub fn workspace_root() -> PathBuf {
	let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
	manifest_dir
		.join("..")
		.join("..")
		.canonicalize()
		.unwrap_or_else(|_| manifest_dir.join("..").join(".."))
}

/// Resolve a fixture path under `<workspace>/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
	workspace_root().join("fixtures").join(name)
}

/// Resolve the workspace target directory.
pub fn target_dir() -> PathBuf {
	std::env::var_os("CARGO_TARGET_DIR")
		.map(PathBuf::from)
		.unwrap_or_else(|| workspace_root().join("target"))
}

/// Copy the fixture script tree into `dir` so tests can edit it.
pub fn copy_fixture_scripts(dir: &Path) -> std::io::Result<()> {
	copy_tree(&fixture_path("scripts"), dir)
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
	std::fs::create_dir_all(to)?;
	for entry in std::fs::read_dir(from)? {
		let entry = entry?;
		let target = to.join(entry.file_name());
		if entry.file_type()?.is_dir() {
			copy_tree(&entry.path(), &target)?;
		} else {
			std::fs::copy(entry.path(), target)?;
		}
	}
	Ok(())
}
