use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, error};

use crate::reload::{ReloadError, Result};

/// Directory scripts and includes are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
	/// Root directory.
	pub dir: PathBuf,
	/// Mod that owns the directory, `None` for core data.
	pub mod_name: Option<String>,
}

impl SourceRoot {
	/// Core data root.
	pub fn core(dir: impl Into<PathBuf>) -> Self {
		Self {
			dir: dir.into(),
			mod_name: None,
		}
	}

	/// Root owned by mod `name`.
	pub fn for_mod(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
		Self {
			dir: dir.into(),
			mod_name: Some(name.into()),
		}
	}
}

/// One file that contributed text to an expanded script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
	/// Resolved file path.
	pub path: PathBuf,
	/// Owning mod, `None` for core data.
	pub mod_name: Option<String>,
	/// Modification time at load.
	#[serde(skip)]
	pub modified: Option<SystemTime>,
}

impl Dependency {
	/// File name without directories.
	pub fn file_name(&self) -> String {
		self.path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| self.path.display().to_string())
	}

	/// Owning mod label, `core` when unowned.
	pub fn mod_label(&self) -> &str {
		self.mod_name.as_deref().unwrap_or("core")
	}
}

/// Position of one expanded line in the file it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineOrigin {
	/// Index into [`ScriptSource::dependencies`].
	pub file: usize,
	/// 1-based line in that file.
	pub line: u32,
}

/// Resolved location of an expanded line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectedLine<'a> {
	/// File the line came from.
	pub dependency: &'a Dependency,
	/// 1-based line in that file.
	pub line: u32,
}

/// Script text with includes expanded.
#[derive(Debug, Clone)]
pub struct ScriptSource {
	/// Resolved path of the root script.
	pub path: PathBuf,
	/// Root script path relative to the source root it was found in.
	pub relative: PathBuf,
	/// Expanded text handed to the compiler.
	pub text: String,
	/// Origin of every expanded line, indexed by `line - 1`.
	pub lines: Vec<LineOrigin>,
	/// Root script first, then includes in expansion order.
	pub dependencies: Vec<Dependency>,
	/// Content hash of `text`.
	pub hash: u64,
}

impl ScriptSource {
	/// Root script dependency.
	pub fn root(&self) -> &Dependency {
		&self.dependencies[0]
	}

	/// Root script file name.
	pub fn file_name(&self) -> String {
		self.root().file_name()
	}

	/// Map a 1-based expanded line back to its file and line.
	pub fn corrected_line(&self, line: u32) -> Option<CorrectedLine<'_>> {
		let origin = self.lines.get(usize::try_from(line).ok()?.checked_sub(1)?)?;
		let dependency = self.dependencies.get(origin.file)?;
		Some(CorrectedLine { dependency, line: origin.line })
	}

	/// Lines describing includes that come from a different mod than the root script.
	pub fn mod_pollution(&self) -> Vec<String> {
		let root = self.root();
		self.dependencies
			.iter()
			.skip(1)
			.filter(|dep| dep.mod_name != root.mod_name)
			.map(|dep| format!("Includes {} from mod {}.", dep.path.display(), dep.mod_label()))
			.collect()
	}

	/// Newest modification time recorded across all dependencies.
	pub fn latest_modification(&self) -> Option<SystemTime> {
		self.dependencies.iter().filter_map(|dep| dep.modified).max()
	}
}

struct Located {
	path: PathBuf,
	relative: PathBuf,
	mod_name: Option<String>,
}

/// Reads scripts and expands `#include` directives.
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
	roots: Vec<SourceRoot>,
	include_markers: bool,
}

impl SourceLoader {
	/// Loader searching `roots` in order.
	pub fn new(roots: Vec<SourceRoot>) -> Self {
		Self { roots, include_markers: false }
	}

	/// Wrap included text in start/end marker comments.
	pub fn with_include_markers(mut self, enabled: bool) -> Self {
		self.include_markers = enabled;
		self
	}

	/// Configured roots.
	pub fn roots(&self) -> &[SourceRoot] {
		&self.roots
	}

	/// Resolve a script path to a file and its owning mod.
	pub fn resolve(&self, path: &Path) -> Option<(PathBuf, Option<String>)> {
		self.locate(path).map(|found| (found.path, found.mod_name))
	}

	fn locate(&self, path: &Path) -> Option<Located> {
		if path.is_file() {
			let root = self.roots.iter().find(|root| path.starts_with(&root.dir));
			let relative = match root.and_then(|root| path.strip_prefix(&root.dir).ok()) {
				Some(relative) => relative.to_path_buf(),
				None if path.is_relative() => path.to_path_buf(),
				None => PathBuf::from(path.file_name()?),
			};
			return Some(Located {
				path: path.to_path_buf(),
				relative,
				mod_name: root.and_then(|root| root.mod_name.clone()),
			});
		}
		if path.is_absolute() {
			return None;
		}

		self.roots.iter().find_map(|root| {
			let candidate = root.dir.join(path);
			candidate.is_file().then(|| Located {
				path: candidate,
				relative: path.to_path_buf(),
				mod_name: root.mod_name.clone(),
			})
		})
	}

	/// Load `path` and expand its includes.
	pub fn load(&self, path: &Path) -> Result<ScriptSource> {
		let Located { path: resolved, relative, mod_name } = self.locate(path).ok_or_else(|| ReloadError::ScriptNotFound { path: path.to_path_buf() })?;

		let text = fs::read_to_string(&resolved)?;
		if text.is_empty() {
			return Err(ReloadError::EmptyScript { path: resolved });
		}

		let mut expansion = Expansion::default();
		let mut stack = vec![resolved.clone()];
		self.expand(&resolved, mod_name, &text, &mut stack, &mut expansion)?;

		let mut text = expansion.lines.join("\n");
		text.push('\n');
		let hash = content_hash(&text);
		debug!(path = %resolved.display(), lines = expansion.lines.len(), includes = expansion.dependencies.len() - 1, "loaded script");

		Ok(ScriptSource {
			path: resolved,
			relative,
			text,
			lines: expansion.origins,
			dependencies: expansion.dependencies,
			hash,
		})
	}

	/// Whether any dependency of `source` was modified after it was loaded.
	pub fn changed_since(&self, source: &ScriptSource) -> bool {
		source.dependencies.iter().any(|dep| {
			let current = fs::metadata(&dep.path).and_then(|meta| meta.modified()).ok();
			current != dep.modified
		})
	}

	fn expand(&self, path: &Path, mod_name: Option<String>, text: &str, stack: &mut Vec<PathBuf>, out: &mut Expansion) -> Result<()> {
		let file = out.dependencies.len();
		out.dependencies.push(Dependency {
			path: path.to_path_buf(),
			mod_name: mod_name.clone(),
			modified: fs::metadata(path).and_then(|meta| meta.modified()).ok(),
		});

		for (index, line) in text.lines().enumerate() {
			let origin = LineOrigin {
				file,
				line: index as u32 + 1,
			};

			let Some(include) = parse_include(line) else {
				out.push(line, origin);
				continue;
			};

			let Some((include_path, include_mod)) = self.resolve_include(path, mod_name.as_deref(), include) else {
				error!(script = %path.display(), include, "Could not resolve script include");
				out.push("", origin);
				continue;
			};

			if stack.contains(&include_path) || out.dependencies.iter().any(|dep| dep.path == include_path) {
				debug!(include = %include_path.display(), "include already expanded");
				out.push("", origin);
				continue;
			}

			let include_text = fs::read_to_string(&include_path)?;
			if self.include_markers {
				out.push(&format!("/*include - START - {} */", include_path.display()), origin);
			}
			stack.push(include_path.clone());
			self.expand(&include_path, include_mod, &include_text, stack, out)?;
			stack.pop();
			if self.include_markers {
				out.push(&format!("/*include - END   - {} */", include_path.display()), origin);
			}
		}

		Ok(())
	}

	fn resolve_include(&self, includer: &Path, includer_mod: Option<&str>, include: &str) -> Option<(PathBuf, Option<String>)> {
		let relative = Path::new(include);
		if let Some(found) = self.roots.iter().find_map(|root| {
			let candidate = root.dir.join(relative);
			candidate.is_file().then(|| (candidate, root.mod_name.clone()))
		}) {
			return Some(found);
		}

		let sibling = includer.parent()?.join(relative);
		sibling.is_file().then(|| (sibling, includer_mod.map(str::to_owned)))
	}
}

#[derive(Debug, Default)]
struct Expansion {
	lines: Vec<String>,
	origins: Vec<LineOrigin>,
	dependencies: Vec<Dependency>,
}

impl Expansion {
	fn push(&mut self, line: &str, origin: LineOrigin) {
		self.lines.push(line.to_owned());
		self.origins.push(origin);
	}
}

/// Path named by an active `#include "..."` directive on `line`.
///
/// Lines where the directive is commented out with `//` are not includes.
pub fn parse_include(line: &str) -> Option<&str> {
	let rest = line.trim_start().strip_prefix("#include")?;
	let rest = rest.trim_start().strip_prefix('"')?;
	let end = rest.find('"')?;
	Some(&rest[..end])
}

/// First 8 bytes (little endian) of the blake3 digest of `text`.
pub fn content_hash(text: &str) -> u64 {
	let digest = blake3::hash(text.as_bytes());
	let mut head = [0_u8; 8];
	head.copy_from_slice(&digest.as_bytes()[..8]);
	u64::from_le_bytes(head)
}
