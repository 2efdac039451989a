use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::OnceLock;

use scriptreload_testkit::{fixture_path, target_dir};

static SCRIPTRELOAD_BIN: OnceLock<PathBuf> = OnceLock::new();

/// Command line for the built binary, rooted at the fixture script tree.
pub(crate) struct Invocation {
	args: Vec<String>,
}

impl Invocation {
	/// `--root` pointing at `fixtures/scripts`.
	pub(crate) fn core() -> Self {
		Self { args: Vec::new() }.args(&["--root", &fixture_arg("scripts")])
	}

	/// No source roots beyond the binary's defaults.
	pub(crate) fn bare() -> Self {
		Self { args: Vec::new() }
	}

	/// Add `--mod name=fixtures/<dir>`.
	pub(crate) fn with_mod(self, name: &str, dir: &str) -> Self {
		let spec = format!("{name}={}", fixture_arg(dir));
		self.args(&["--mod", &spec])
	}

	pub(crate) fn args(mut self, args: &[&str]) -> Self {
		self.args.extend(args.iter().map(|arg| (*arg).to_owned()));
		self
	}

	pub(crate) fn output(&self) -> Output {
		Command::new(scriptreload_bin()).args(&self.args).output().expect("scriptreload command executes")
	}

	/// Stdout of a successful run.
	pub(crate) fn stdout(&self) -> String {
		let output = self.output();
		assert!(output.status.success(), "scriptreload {:?} failed: {}", self.args, String::from_utf8_lossy(&output.stderr));
		String::from_utf8_lossy(&output.stdout).into_owned()
	}

	/// Stdout of a successful `--json` run.
	pub(crate) fn json(&self) -> serde_json::Value {
		serde_json::from_str(&self.stdout()).expect("stdout should be valid json")
	}

	/// Stderr of a run expected to fail.
	pub(crate) fn failure(&self) -> String {
		let output = self.output();
		assert!(!output.status.success(), "scriptreload {:?} unexpectedly succeeded", self.args);
		String::from_utf8_lossy(&output.stderr).into_owned()
	}
}

pub(crate) fn fixture_arg(name: &str) -> String {
	fixture_path(name).to_string_lossy().into_owned()
}

fn scriptreload_bin() -> &'static PathBuf {
	SCRIPTRELOAD_BIN.get_or_init(|| {
		let name = if cfg!(windows) { "scriptreload.exe" } else { "scriptreload" };
		// Unit test executables live in `<profile>/deps`, next to the binary's profile dir.
		let beside_tests = std::env::current_exe().ok().and_then(|exe| Some(exe.parent()?.parent()?.join(name)));
		if let Some(bin) = beside_tests.filter(|bin| bin.is_file()) {
			return bin;
		}

		let bin = target_dir().join("debug").join(name);
		let status = Command::new("cargo")
			.current_dir(env!("CARGO_MANIFEST_DIR"))
			.args(["build", "--quiet", "--bin", "scriptreload"])
			.status()
			.expect("cargo build executes");
		assert!(status.success(), "failed to build scriptreload binary at {}", bin.display());
		bin
	})
}
