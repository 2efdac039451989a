use std::fs;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::reload::{ReloadError, Result};

/// Settings of the compile/cache pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
	/// Directory holding `<script>.bytecode` files.
	pub cache_dir: PathBuf,
	/// Read and write the bytecode cache.
	pub cache_enabled: bool,
	/// Directory receiving `<script>.full.as` dumps.
	pub debug_dump_dir: PathBuf,
	/// Dump expanded sources and wrap includes in marker comments.
	pub dump_include_scripts: bool,
	/// Prefix error reports with includes pulled from other mods.
	pub list_include_files_when_logging_mod_errors: bool,
	/// Written into cache headers; entries from another build are ignored.
	pub build_id: String,
}

impl Default for ReloadConfig {
	fn default() -> Self {
		Self {
			cache_dir: PathBuf::from("Data/ScriptBytecode"),
			cache_enabled: true,
			debug_dump_dir: PathBuf::from("Data/ScriptDebug"),
			dump_include_scripts: false,
			list_include_files_when_logging_mod_errors: true,
			build_id: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")).to_owned(),
		}
	}
}

impl ReloadConfig {
	/// Load from a JSON file; absent keys keep their defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let text = fs::read_to_string(path)?;
		serde_json::from_str(&text).map_err(|source| ReloadError::Config {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Cache file for the script at root-relative path `script`.
	pub fn cache_path(&self, script: &Path) -> PathBuf {
		self.cache_dir.join(script_label(script, ".bytecode"))
	}

	/// Debug dump file for the script at root-relative path `script`.
	pub fn dump_path(&self, script: &Path) -> PathBuf {
		self.debug_dump_dir.join(script_label(script, ".full.as"))
	}
}

/// `script` with `suffix` appended, keeping only plain components so the result stays inside its directory.
fn script_label(script: &Path, suffix: &str) -> PathBuf {
	let mut label: PathBuf = script
		.components()
		.filter_map(|component| match component {
			Component::Normal(part) => Some(part),
			_ => None,
		})
		.collect();
	if label.as_os_str().is_empty() {
		label.push("script");
	}

	let mut name = label.file_name().map(OsString::from).unwrap_or_default();
	name.push(suffix);
	label.set_file_name(name);
	label
}
