use std::path::PathBuf;

use scriptreload::reload::{ReloadConfig, Result, SourceLoader, SourceRoot};

/// Bytecode cache file inspection command.
pub mod cache;
/// Include expansion and line mapping command.
pub mod expand;
/// Script source summary command.
pub mod info;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod util;

/// Source roots and config shared by every command.
#[derive(clap::Args)]
pub struct SourceArgs {
	/// Core script root.
	#[arg(long, global = true, default_value = ".")]
	pub root: PathBuf,
	/// Mod script root, searched before the core root.
	#[arg(long = "mod", value_name = "NAME=DIR", value_parser = parse_mod_root, global = true)]
	pub mods: Vec<SourceRoot>,
	/// JSON config file.
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,
}

/// Resolved config and loader.
pub struct Env {
	pub config: ReloadConfig,
	pub loader: SourceLoader,
}

impl SourceArgs {
	/// Load the config and build the source loader.
	pub fn into_env(self) -> Result<Env> {
		let Self { root, mut mods, config } = self;
		let config = match config {
			Some(path) => ReloadConfig::load(&path)?,
			None => ReloadConfig::default(),
		};

		mods.push(SourceRoot::core(root));
		let loader = SourceLoader::new(mods).with_include_markers(config.dump_include_scripts);
		Ok(Env { config, loader })
	}
}

fn parse_mod_root(value: &str) -> std::result::Result<SourceRoot, String> {
	match value.split_once('=') {
		Some((name, dir)) if !name.is_empty() && !dir.is_empty() => Ok(SourceRoot::for_mod(name, dir)),
		_ => Err(format!("expected NAME=DIR, got {value:?}")),
	}
}
