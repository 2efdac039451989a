#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use scriptreload::reload::{
	CacheStatus, Compiler, ModuleHost, ModuleOrigin, NonInteractive, OperatorChoice, ReloadConfig, ReloadError, ReloadState, ReportKind, Scalar, ScriptModule, Severity, SlotValue, SourceLoader, SourceRoot, read_entry,
};
use scriptreload_testkit::{SandboxEngine, ScriptedOperator, copy_fixture_scripts, fixture_path};
use tempfile::TempDir;

struct Scratch {
	dir: TempDir,
}

impl Scratch {
	fn new() -> Self {
		let dir = tempfile::tempdir().expect("tempdir");
		copy_fixture_scripts(&dir.path().join("scripts")).expect("fixture scripts copy");
		Self { dir }
	}

	fn scripts(&self) -> PathBuf {
		self.dir.path().join("scripts")
	}

	fn config(&self) -> ReloadConfig {
		ReloadConfig {
			cache_dir: self.dir.path().join("cache"),
			debug_dump_dir: self.dir.path().join("dump"),
			..ReloadConfig::default()
		}
	}

	fn compiler(&self) -> Compiler {
		self.compiler_with(self.config())
	}

	fn compiler_with(&self, config: ReloadConfig) -> Compiler {
		Compiler::new(config, SourceLoader::new(vec![SourceRoot::core(self.scripts())]))
	}

	fn write(&self, name: &str, text: &str) -> PathBuf {
		let path = self.scripts().join(name);
		fs::write(&path, text).expect("script write");
		path
	}

	fn edit(&self, name: &str, from: &str, to: &str) {
		let path = self.scripts().join(name);
		let text = fs::read_to_string(&path).expect("script read");
		assert!(text.contains(from), "{name} does not contain {from:?}");
		fs::write(&path, text.replacen(from, to, 1)).expect("script write");
		touch_later(&path);
	}
}

fn touch_later(path: &Path) {
	let file = fs::File::options().write(true).open(path).expect("script opens");
	file.set_modified(SystemTime::now() + Duration::from_secs(5)).expect("mtime updates");
}

#[test]
fn second_build_loads_cached_bytecode_without_compiling() {
	let scratch = Scratch::new();
	let compiler = scratch.compiler();
	let mut engine = SandboxEngine::new();

	let first = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("first build");
	assert_eq!(first.origin, ModuleOrigin::Source);
	assert_eq!(first.cache, CacheStatus::Written);
	assert_eq!(engine.build_count(), 1);

	let entry = read_entry(&compiler.config().cache_path(&first.source.relative)).expect("cache readable").expect("cache entry written");
	assert_eq!(entry.key.content_hash, first.source.hash);

	let second = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("second build");
	assert_eq!(second.origin, ModuleOrigin::Cache);
	assert_eq!(second.cache, CacheStatus::Hit);
	assert_eq!(engine.build_count(), 1);
	assert_eq!(engine.bytecode_loads(), 1);
	assert_eq!(second.module.scalar("global_counter"), Some(Scalar::Int32(5)));
}

#[test]
fn one_byte_change_in_an_include_forces_recompile() {
	let scratch = Scratch::new();
	let compiler = scratch.compiler();
	let mut engine = SandboxEngine::new();

	compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("first build");
	scratch.edit("common/state.as", "1.5", "2.5");

	let rebuilt = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("rebuild");
	assert_eq!(rebuilt.origin, ModuleOrigin::Source);
	assert_eq!(engine.build_count(), 2);
	assert_eq!(engine.bytecode_loads(), 0);
}

#[test]
fn cache_from_another_build_is_ignored() {
	let scratch = Scratch::new();
	let mut engine = SandboxEngine::new();
	scratch.compiler().build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("first build");

	let other = scratch.compiler_with(ReloadConfig {
		build_id: "another build".to_owned(),
		..scratch.config()
	});
	let rebuilt = other.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("rebuild");
	assert_eq!(rebuilt.origin, ModuleOrigin::Source);
	assert_eq!(engine.build_count(), 2);
}

#[test]
fn corrupt_cache_entry_falls_back_to_compiling() {
	let scratch = Scratch::new();
	let compiler = scratch.compiler();
	let cache_path = compiler.config().cache_path(Path::new("arena.as"));
	fs::create_dir_all(cache_path.parent().expect("cache dir")).expect("cache dir created");
	fs::write(&cache_path, b"short").expect("garbage written");

	let mut engine = SandboxEngine::new();
	let built = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("build");
	assert_eq!(built.origin, ModuleOrigin::Source);
	assert_eq!(built.cache, CacheStatus::Written);
}

#[test]
fn cache_write_failure_does_not_fail_the_build() {
	let scratch = Scratch::new();
	let blocker = scratch.dir.path().join("blocker");
	fs::write(&blocker, b"not a directory").expect("blocker written");
	let compiler = scratch.compiler_with(ReloadConfig {
		cache_dir: blocker.join("cache"),
		..scratch.config()
	});

	let mut engine = SandboxEngine::new();
	let built = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("build");
	assert!(matches!(built.cache, CacheStatus::WriteFailed { .. }), "unexpected cache status {:?}", built.cache);
}

#[test]
fn disabled_cache_always_compiles() {
	let scratch = Scratch::new();
	let compiler = scratch.compiler_with(ReloadConfig {
		cache_enabled: false,
		..scratch.config()
	});
	let mut engine = SandboxEngine::new();

	for _ in 0..2 {
		let built = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("build");
		assert_eq!(built.cache, CacheStatus::Disabled);
	}
	assert_eq!(engine.build_count(), 2);
	assert!(!compiler.config().cache_path(Path::new("arena.as")).exists());
}

#[test]
fn include_dump_wraps_included_text_in_markers() {
	let scratch = Scratch::new();
	let compiler = scratch.compiler_with(ReloadConfig {
		dump_include_scripts: true,
		..scratch.config()
	});
	let mut engine = SandboxEngine::new();
	let built = compiler.build(&mut engine, &mut NonInteractive, Path::new("arena.as")).expect("build");

	let dump = fs::read_to_string(compiler.config().dump_path(&built.source.relative)).expect("dump written");
	assert_eq!(dump, built.source.text);
	assert!(dump.contains("/*include - START - "), "{dump}");
	assert!(dump.contains("/*include - END   - "), "{dump}");
}

#[test]
fn errors_are_reported_with_original_file_and_line() {
	let scratch = Scratch::new();
	scratch.write("common/bad.as", "int fine;\nWidget broken;\n");
	scratch.write("broken.as", "#include \"common/bad.as\"\nint after;\n");

	let mut operator = ScriptedOperator::new([OperatorChoice::Accept]);
	let reports = operator.reports();
	let mut engine = SandboxEngine::new();
	let err = scratch.compiler().build(&mut engine, &mut operator, Path::new("broken.as")).expect_err("build fails");

	assert!(matches!(err, ReloadError::CompileFailed { .. }), "unexpected error {err}");
	let reports = reports.borrow();
	assert_eq!(reports.len(), 1);
	let report = &reports[0];
	assert_eq!(report.kind, ReportKind::Errors);
	assert_eq!(report.title, "Error in \"broken.as\" from mod core");
	let diag = report.diagnostics.iter().find(|diag| diag.severity == Severity::Error).expect("error diagnostic");
	assert_eq!(diag.file, "bad.as");
	assert_eq!(diag.line, 2);
	assert!(report.details.contains("ERR: bad.as (2, 1) Identifier 'Widget' is not a data type"), "{}", report.details);
}

#[test]
fn continue_on_errors_still_fails() {
	let scratch = Scratch::new();
	scratch.write("broken.as", "int x = ;\n");
	let mut operator = ScriptedOperator::new([OperatorChoice::Continue]);
	let mut engine = SandboxEngine::new();

	let err = scratch.compiler().build(&mut engine, &mut operator, Path::new("broken.as")).expect_err("build fails");
	assert!(matches!(err, ReloadError::CompileFailed { .. }), "unexpected error {err}");
	assert!(!err.is_fatal());
}

#[test]
fn retry_recompiles_after_the_script_is_fixed() {
	let scratch = Scratch::new();
	let path = scratch.write("broken.as", "int x = ;\n");
	let fixed = path.clone();
	let mut operator = ScriptedOperator::new([OperatorChoice::Retry]).on_review(move |_| {
		fs::write(&fixed, "int x = 1;\n").expect("fix written");
	});
	let reports = operator.reports();
	let mut engine = SandboxEngine::new();

	let built = scratch.compiler().build(&mut engine, &mut operator, Path::new("broken.as")).expect("retried build");
	assert_eq!(reports.borrow().len(), 1);
	assert_eq!(engine.build_count(), 2);
	assert_eq!(built.module.scalar("x"), Some(Scalar::Int32(1)));
}

#[test]
fn warnings_follow_the_operator_choice() {
	let scratch = Scratch::new();
	scratch.write("noisy.as", "#warn unused variable\nint x = 2;\n");
	let mut engine = SandboxEngine::new();
	let compiler = scratch.compiler_with(ReloadConfig {
		cache_enabled: false,
		..scratch.config()
	});

	let mut accept = ScriptedOperator::new([OperatorChoice::Accept]);
	let err = compiler.build(&mut engine, &mut accept, Path::new("noisy.as")).expect_err("warnings rejected");
	assert!(matches!(err, ReloadError::CompileRejected { .. }), "unexpected error {err}");

	let mut carry_on = ScriptedOperator::new([OperatorChoice::Continue]);
	let reports = carry_on.reports();
	let built = compiler.build(&mut engine, &mut carry_on, Path::new("noisy.as")).expect("warnings accepted");
	assert_eq!(reports.borrow()[0].kind, ReportKind::Warnings);
	assert_eq!(reports.borrow()[0].title, "Warnings in \"noisy.as\" from mod core");
	assert_eq!(built.diagnostics.len(), 1);
	assert_eq!(built.diagnostics[0].severity, Severity::Warning);

	let mut retry_then_continue = ScriptedOperator::new([OperatorChoice::Retry, OperatorChoice::Continue]);
	let reports = retry_then_continue.reports();
	compiler.build(&mut engine, &mut retry_then_continue, Path::new("noisy.as")).expect("warnings accepted after retry");
	assert_eq!(reports.borrow().len(), 2);
}

#[test]
fn rejected_section_is_fatal() {
	let scratch = Scratch::new();
	let mut engine = SandboxEngine::new().reject_sections(true);
	let err = scratch
		.compiler_with(ReloadConfig {
			cache_enabled: false,
			..scratch.config()
		})
		.build(&mut engine, &mut NonInteractive, Path::new("arena.as"))
		.expect_err("section rejected");

	assert!(matches!(err, ReloadError::AddSection { .. }), "unexpected error {err}");
	assert!(err.is_fatal());
	assert_eq!(engine.build_count(), 0);
}

#[test]
fn reports_list_includes_from_other_mods() {
	let scratch = Scratch::new();
	let mod_dir = scratch.dir.path().join("mods").join("tweaks");
	fs::create_dir_all(&mod_dir).expect("mod dir");
	fs::write(mod_dir.join("tweaks.as"), "#include \"common/state.as\"\nWidget broken;\n").expect("mod script");

	let loader = SourceLoader::new(vec![SourceRoot::for_mod("tweaks", &mod_dir), SourceRoot::core(scratch.scripts())]);
	let compiler = Compiler::new(scratch.config(), loader);
	let mut operator = ScriptedOperator::new([]);
	let reports = operator.reports();
	let mut engine = SandboxEngine::new();
	compiler.build(&mut engine, &mut operator, Path::new("tweaks.as")).expect_err("build fails");

	let reports = reports.borrow();
	assert_eq!(reports[0].title, "Error in \"tweaks.as\" from mod tweaks");
	assert!(reports[0].details.starts_with("Includes "), "{}", reports[0].details);
	assert!(reports[0].details.contains("state.as from mod core."), "{}", reports[0].details);

	let quiet = Compiler::new(
		ReloadConfig {
			list_include_files_when_logging_mod_errors: false,
			..scratch.config()
		},
		SourceLoader::new(vec![SourceRoot::for_mod("tweaks", &mod_dir), SourceRoot::core(scratch.scripts())]),
	);
	let mut operator = ScriptedOperator::new([]);
	let quiet_reports = operator.reports();
	quiet.build(&mut engine, &mut operator, Path::new("tweaks.as")).expect_err("build fails");
	assert!(!quiet_reports.borrow()[0].details.contains("Includes "));
}

#[test]
fn scripts_sharing_a_file_name_keep_separate_cache_entries() {
	let scratch = Scratch::new();
	for (dir, value) in [("left", 1), ("right", 2)] {
		fs::create_dir_all(scratch.scripts().join(dir)).expect("script dir created");
		scratch.write(&format!("{dir}/main.as"), &format!("int side = {value};\n"));
	}
	let compiler = scratch.compiler();
	let mut engine = SandboxEngine::new();

	for script in ["left/main.as", "right/main.as"] {
		let built = compiler.build(&mut engine, &mut NonInteractive, Path::new(script)).expect("first build");
		assert_eq!(built.cache, CacheStatus::Written, "{script}");
	}
	assert_eq!(engine.build_count(), 2);

	for script in ["left/main.as", "right/main.as"] {
		let built = compiler.build(&mut engine, &mut NonInteractive, Path::new(script)).expect("cached build");
		assert_eq!(built.origin, ModuleOrigin::Cache, "{script}");
	}
	assert_eq!(engine.build_count(), 2);
	assert_ne!(compiler.config().cache_path(Path::new("left/main.as")), compiler.config().cache_path(Path::new("right/main.as")));
}

#[test]
fn reload_keeps_counter_and_shared_handle() {
	let scratch = Scratch::new();
	let mut host = ModuleHost::new(SandboxEngine::new(), scratch.compiler());
	assert_eq!(host.state(), ReloadState::Unloaded);
	host.compile_script("arena.as").expect("initial compile");
	assert_eq!(host.state(), ReloadState::Loaded);

	let module = host.module_mut().expect("live module");
	let foo = module.new_object("Foo").expect("Foo class");
	let value = module.field_slot(foo, "value").expect("value field");
	module.set(value, SlotValue::Scalar(Scalar::Int32(3))).expect("value fits");
	let a = module.global_slot("a").expect("a");
	let b = module.global_slot("b").expect("b");
	module.assign_handle(a, Some(foo)).expect("assign a");
	module.assign_handle(b, Some(foo)).expect("assign b");

	scratch.edit("arena.as", "\tint value;\n", "\tint value;\n\tint extra;\n");
	assert!(host.source_changed());

	let outcome = host.recompile().expect("reload");
	assert_eq!(outcome.origin, ModuleOrigin::Source);
	assert!(outcome.report.vanished_globals.is_empty());
	assert!(!host.source_changed());

	let module = host.module().expect("live module");
	assert_eq!(module.scalar("global_counter"), Some(Scalar::Int32(5)));
	let a = module.object("a").expect("a restored");
	assert_eq!(module.object("b"), Some(a));
	assert!(matches!(module.field(a, "value"), Some(SlotValue::Scalar(Scalar::Int32(3)))));
	assert!(matches!(module.field(a, "extra"), Some(SlotValue::Scalar(Scalar::Int32(0)))));
	assert_eq!(module.refcount(a), Some(2));
	assert_eq!(module.refcount(foo), None);

	let module = host.module_mut().expect("live module");
	let fresh = module.new_object("Foo").expect("Foo class");
	assert_ne!(fresh, a);
	assert!(matches!(module.field(fresh, "value"), Some(SlotValue::Scalar(Scalar::Int32(0)))));
	assert!(matches!(module.field(a, "value"), Some(SlotValue::Scalar(Scalar::Int32(3)))));
}

#[test]
fn failed_reload_keeps_the_previous_module() {
	let scratch = Scratch::new();
	let mut host = ModuleHost::new(SandboxEngine::new(), scratch.compiler());
	host.compile_script("arena.as").expect("initial compile");

	let module = host.module_mut().expect("live module");
	let counter = module.global_slot("global_counter").expect("counter");
	module.set(counter, SlotValue::Scalar(Scalar::Int32(11))).expect("counter fits");

	scratch.edit("arena.as", "int global_counter = 5;", "int global_counter = ;");
	let err = host.recompile().expect_err("reload fails");
	assert!(matches!(err, ReloadError::CompileFailed { .. }), "unexpected error {err}");
	assert_eq!(host.state(), ReloadState::Loaded);
	assert_eq!(host.module().and_then(|module| module.scalar("global_counter")), Some(Scalar::Int32(11)));
	assert_eq!(host.engine().live_objects(), 1);
}

#[test]
fn recompile_needs_a_script() {
	let scratch = Scratch::new();
	let mut host = ModuleHost::new(SandboxEngine::new(), scratch.compiler());
	assert!(matches!(host.recompile(), Err(ReloadError::NoScriptLoaded)));

	host.compile_from_text("int typed = 4;").expect("console text compiles");
	assert_eq!(host.module().and_then(|module| module.scalar("typed")), Some(Scalar::Int32(4)));
	assert!(host.source().is_none());
	assert!(matches!(host.recompile(), Err(ReloadError::NoScriptLoaded)));
}

#[test]
fn globals_dump_and_line_mapping_follow_the_live_module() {
	let scratch = Scratch::new();
	let mut host = ModuleHost::new(SandboxEngine::new(), scratch.compiler()).with_operator(ScriptedOperator::new([]));
	host.compile_script("arena.as").expect("initial compile");

	let dump = host.globals_dump();
	assert!(dump.contains("int32 global_counter = 5"), "{dump}");
	assert!(!dump.contains("LIMIT"), "{dump}");

	let json = host.globals_json();
	assert!(json["root"].as_array().is_some_and(|root| root.iter().any(|var| var["name"] == "global_counter")));

	let included = host.corrected_line(3).expect("line 3 maps");
	assert_eq!(included.dependency.file_name(), "state.as");
	assert_eq!(included.line, 2);
	assert_eq!(host.module().map(|module| module.globals().len()), Some(9));
}

#[test]
fn fixture_tree_is_available() {
	assert!(fixture_path("scripts/arena.as").is_file());
	assert!(fixture_path("scripts/common/state.as").is_file());
}
