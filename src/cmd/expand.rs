use std::path::PathBuf;

use scriptreload::reload::{ReloadError, Result};

#[derive(clap::Args)]
pub struct Args {
	pub script: PathBuf,
	/// Map one expanded line back to its file instead of printing the text.
	#[arg(long)]
	pub line: Option<u32>,
}

/// Print the include-expanded script, or where one of its lines came from.
pub fn run(env: &crate::cmd::Env, args: Args) -> Result<()> {
	let Args { script, line } = args;
	let source = env.loader.load(&script)?;

	let Some(line) = line else {
		print!("{}", source.text);
		return Ok(());
	};

	let corrected = source.corrected_line(line).ok_or_else(|| ReloadError::LineOutOfRange { line, lines: source.lines.len() })?;
	println!("{}:{} ({})", corrected.dependency.path.display(), corrected.line, corrected.dependency.mod_label());
	Ok(())
}
