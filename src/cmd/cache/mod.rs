use std::fs;
use std::path::PathBuf;

use scriptreload::reload::{CACHE_FORMAT_VERSION, CacheKey, Result, decode_entry};
use serde::Serialize;

use crate::cmd::Env;
use crate::cmd::util::{emit_json, hash_hex};

#[derive(clap::Args)]
pub struct Args {
	pub file: PathBuf,
	/// Script to check the entry against.
	#[arg(long)]
	pub source: Option<PathBuf>,
	#[arg(long)]
	pub json: bool,
}

/// Print a cache file header and, optionally, whether it still matches its script.
pub fn run(env: &Env, args: Args) -> Result<()> {
	let Args { file, source, json } = args;

	let bytes = fs::read(&file)?;
	let entry = decode_entry(&bytes)?;
	let freshness = match source {
		Some(script) => {
			let loaded = env.loader.load(&script)?;
			Some(freshness(&entry.key, &CacheKey::current(&env.config.build_id, loaded.hash)))
		}
		None => None,
	};

	if json {
		emit_json(&CacheJson {
			path: file.display().to_string(),
			version: entry.key.version,
			build_id: entry.key.build_id.clone(),
			content_hash: hash_hex(entry.key.content_hash),
			compression: entry.compression.as_str(),
			file_bytes: bytes.len(),
			payload_bytes: entry.payload.len(),
			freshness: freshness.map(Freshness::as_str),
		});
		return Ok(());
	}

	println!("path: {}", file.display());
	println!("version: {}", entry.key.version);
	println!("build_id: {}", entry.key.build_id);
	println!("content_hash: {}", hash_hex(entry.key.content_hash));
	println!("compression: {}", entry.compression.as_str());
	println!("file_bytes: {}", bytes.len());
	println!("payload_bytes: {}", entry.payload.len());
	if let Some(freshness) = freshness {
		println!("freshness: {}", freshness.as_str());
	}

	Ok(())
}

/// Why a cache entry would or would not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
	Fresh,
	OutdatedVersion,
	OtherBuild,
	SourceChanged,
}

impl Freshness {
	pub(crate) fn as_str(self) -> &'static str {
		match self {
			Self::Fresh => "fresh",
			Self::OutdatedVersion => "outdated_version",
			Self::OtherBuild => "other_build",
			Self::SourceChanged => "source_changed",
		}
	}
}

/// Compare a stored header with the key the current build would write.
pub(crate) fn freshness(stored: &CacheKey, expected: &CacheKey) -> Freshness {
	if stored.version != CACHE_FORMAT_VERSION {
		Freshness::OutdatedVersion
	} else if stored.build_id != expected.build_id {
		Freshness::OtherBuild
	} else if stored.content_hash != expected.content_hash {
		Freshness::SourceChanged
	} else {
		Freshness::Fresh
	}
}

#[derive(Serialize)]
struct CacheJson {
	path: String,
	version: u32,
	build_id: String,
	content_hash: String,
	compression: &'static str,
	file_bytes: usize,
	payload_bytes: usize,
	freshness: Option<&'static str>,
}
