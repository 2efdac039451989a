use std::path::PathBuf;

use scriptreload::reload::{CacheKey, Result, read_entry};
use serde::Serialize;

use crate::cmd::Env;
use crate::cmd::cache::freshness;
use crate::cmd::util::{emit_json, hash_hex, mod_label};

#[derive(clap::Args)]
pub struct Args {
	pub script: PathBuf,
	#[arg(long)]
	pub json: bool,
}

/// Print the expanded size, include tree and cache state of one script.
pub fn run(env: &Env, args: Args) -> Result<()> {
	let Args { script, json } = args;

	let source = env.loader.load(&script)?;
	let cache_path = env.config.cache_path(&source.relative);
	let cache_state = match read_entry(&cache_path) {
		Ok(Some(entry)) => freshness(&entry.key, &CacheKey::current(&env.config.build_id, source.hash)).as_str(),
		Ok(None) => "missing",
		Err(_) => "unreadable",
	};
	let pollution = source.mod_pollution();

	if json {
		emit_json(&InfoJson {
			path: source.path.display().to_string(),
			owner: source.root().mod_label().to_owned(),
			content_hash: hash_hex(source.hash),
			lines: source.lines.len(),
			bytes: source.text.len(),
			dependencies: source
				.dependencies
				.iter()
				.map(|dep| DependencyJson {
					path: dep.path.display().to_string(),
					owner: mod_label(dep.mod_name.as_deref()).to_owned(),
				})
				.collect(),
			mod_pollution: pollution,
			cache: CacheJson {
				path: cache_path.display().to_string(),
				build_id: env.config.build_id.clone(),
				state: cache_state,
			},
		});
		return Ok(());
	}

	println!("path: {}", source.path.display());
	println!("owner: {}", source.root().mod_label());
	println!("content_hash: {}", hash_hex(source.hash));
	println!("lines: {}", source.lines.len());
	println!("bytes: {}", source.text.len());
	println!("dependencies:");
	for dep in &source.dependencies {
		println!("  {} ({})", dep.path.display(), mod_label(dep.mod_name.as_deref()));
	}
	for line in &pollution {
		println!("{line}");
	}
	println!("cache_path: {}", cache_path.display());
	println!("cache_state: {cache_state}");

	Ok(())
}

#[derive(Serialize)]
struct InfoJson {
	path: String,
	owner: String,
	content_hash: String,
	lines: usize,
	bytes: usize,
	dependencies: Vec<DependencyJson>,
	mod_pollution: Vec<String>,
	cache: CacheJson,
}

#[derive(Serialize)]
struct DependencyJson {
	path: String,
	owner: String,
}

#[derive(Serialize)]
struct CacheJson {
	path: String,
	build_id: String,
	state: &'static str,
}
