#![allow(missing_docs)]

use std::rc::Rc;

use scriptreload::reload::{
	HostHandleValue, HostObject, HostTypeRegistry, HostValue, InstanceOrigin, RestoreReport, Scalar, SceneObjectId, ScriptEngine, ScriptModule, SkipReason, Slot, SlotValue, Snapshot, VariantValue, restore_globals, snapshot_globals,
};
use scriptreload_testkit::{CountedHost, SandboxEngine, SandboxModule};

fn build(engine: &mut SandboxEngine, text: &str) -> SandboxModule {
	let mut module = engine.create_module("test.as");
	engine.add_section(&mut module, "script", text).expect("section is accepted");
	let output = engine.build(&mut module);
	assert!(output.success, "sandbox build failed:\n{}", output.messages);
	module
}

fn reload(engine: &mut SandboxEngine, old: SandboxModule, text: &str) -> (SandboxModule, RestoreReport) {
	let registry = HostTypeRegistry::with_defaults();
	let snapshot = snapshot_globals(&old, &registry);
	let mut new = build(engine, text);
	let report = restore_globals(snapshot, &mut new, &registry);
	drop(old);
	(new, report)
}

fn set(module: &mut SandboxModule, name: &str, value: SlotValue) {
	let slot = module.global_slot(name).expect("global exists");
	module.set(slot, value).expect("value fits slot");
}

#[test]
fn scalars_of_every_width_survive_reload() {
	let text = "bool flag; int8 tiny; int16 small; int medium; int64 large; uint8 ubyte; uint16 ushort; uint umedium; uint64 ularge; float ratio; double precise;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let values = [
		("flag", Scalar::Bool(true)),
		("tiny", Scalar::Int8(-7)),
		("small", Scalar::Int16(-300)),
		("medium", Scalar::Int32(123_456)),
		("large", Scalar::Int64(-9_000_000_000)),
		("ubyte", Scalar::UInt8(250)),
		("ushort", Scalar::UInt16(65_000)),
		("umedium", Scalar::UInt32(4_000_000_000)),
		("ularge", Scalar::UInt64(u64::MAX)),
		("ratio", Scalar::Float(0.25)),
		("precise", Scalar::Double(-1.5e300)),
	];
	for (name, value) in values {
		set(&mut old, name, SlotValue::Scalar(value));
	}

	let (new, report) = reload(&mut engine, old, text);
	assert_eq!(report.restored_globals, values.len());
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
	for (name, value) in values {
		assert_eq!(new.scalar(name), Some(value), "global {name}");
	}
}

#[test]
fn enums_and_host_values_survive_reload() {
	let text = r#"
enum Mood { Calm, Angry = 4 }
Mood mood;
vec3 spawn;
quaternion facing;
string banner = "start";
JSON settings;
ModID owner;
NavPath route;
"#;
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);
	set(&mut old, "mood", SlotValue::Enum(4_i32.to_le_bytes().to_vec()));
	set(&mut old, "spawn", SlotValue::Host(HostValue::Vec3([1.0, 2.0, 3.0])));
	set(&mut old, "facing", SlotValue::Host(HostValue::Quaternion([0.0, 0.7, 0.0, 0.7])));
	set(&mut old, "banner", SlotValue::Host(HostValue::String("round two".to_owned())));
	set(&mut old, "settings", SlotValue::Host(HostValue::Json(r#"{"lives":3}"#.to_owned())));
	set(&mut old, "owner", SlotValue::Host(HostValue::ModId(12)));
	set(&mut old, "route", SlotValue::Host(HostValue::NavPath(vec![[0.0, 0.0, 0.0], [4.0, 0.0, 1.0]])));

	let (new, report) = reload(&mut engine, old, text);
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);

	assert!(matches!(new.global("mood"), Some(SlotValue::Enum(bytes)) if bytes == 4_i32.to_le_bytes()));
	assert!(matches!(new.global("spawn"), Some(SlotValue::Host(HostValue::Vec3(v))) if v == [1.0, 2.0, 3.0]));
	assert!(matches!(new.global("facing"), Some(SlotValue::Host(HostValue::Quaternion(q))) if q == [0.0, 0.7, 0.0, 0.7]));
	assert!(matches!(new.global("banner"), Some(SlotValue::Host(HostValue::String(s))) if s == "round two"));
	assert!(matches!(new.global("settings"), Some(SlotValue::Host(HostValue::Json(s))) if s == r#"{"lives":3}"#));
	assert!(matches!(new.global("owner"), Some(SlotValue::Host(HostValue::ModId(12)))));
	assert!(matches!(new.global("route"), Some(SlotValue::Host(HostValue::NavPath(points))) if points.is_empty()));
}

#[test]
fn const_globals_are_not_captured() {
	let mut engine = SandboxEngine::new();
	let old = build(&mut engine, "const int LIMIT = 3; int score = 1;");
	let snapshot = snapshot_globals(&old, &HostTypeRegistry::with_defaults());

	assert!(snapshot.global("LIMIT").is_none());
	assert!(snapshot.global("score").is_some());
}

#[test]
fn value_objects_and_arrays_survive_reload() {
	let text = r#"
namespace state {
	class Tracker {
		int hits;
		float weight = 1.5;
	}
}
state::Tracker tracker;
array<int> scores;
array<state::Tracker> history;
"#;
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let tracker = old.object("tracker").expect("tracker object");
	let hits = old.field_slot(tracker, "hits").expect("hits field");
	old.set(hits, SlotValue::Scalar(Scalar::Int32(9))).expect("hits fits");

	let scores = old.array("scores").expect("scores array");
	old.resize_array(scores, 3).expect("resize scores");
	for (index, value) in [10, 20, 30].into_iter().enumerate() {
		old.set(Slot::Element(scores, index), SlotValue::Scalar(Scalar::Int32(value))).expect("score fits");
	}

	let history = old.array("history").expect("history array");
	old.resize_array(history, 2).expect("resize history");
	let Some(SlotValue::Object(second)) = old.read_slot(Slot::Element(history, 1)) else {
		panic!("array element holds an object");
	};
	let weight = old.field_slot(second, "weight").expect("weight field");
	old.set(weight, SlotValue::Scalar(Scalar::Float(8.0))).expect("weight fits");

	let (new, report) = reload(&mut engine, old, text);
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);

	let tracker = new.object("tracker").expect("tracker object");
	assert_eq!(new.class_name(tracker).as_deref(), Some("state::Tracker"));
	assert!(matches!(new.field(tracker, "hits"), Some(SlotValue::Scalar(Scalar::Int32(9)))));
	assert!(matches!(new.field(tracker, "weight"), Some(SlotValue::Scalar(Scalar::Float(w))) if w == 1.5));

	let scores = new.array("scores").expect("scores array");
	assert_eq!(new.array_len(scores), 3);
	assert!(matches!(new.read_slot(Slot::Element(scores, 2)), Some(SlotValue::Scalar(Scalar::Int32(30)))));

	let history = new.array("history").expect("history array");
	assert_eq!(new.array_len(history), 2);
	let Some(SlotValue::Object(second)) = new.read_slot(Slot::Element(history, 1)) else {
		panic!("array element holds an object");
	};
	assert!(matches!(new.field(second, "weight"), Some(SlotValue::Scalar(Scalar::Float(w))) if w == 8.0));
}

#[test]
fn shared_handles_are_captured_once_and_stay_shared() {
	let text = "class Foo { int value; } int global_counter = 0; Foo@ a; Foo@ b;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	set(&mut old, "global_counter", SlotValue::Scalar(Scalar::Int32(5)));
	let foo = old.new_object("Foo").expect("Foo class");
	let value = old.field_slot(foo, "value").expect("value field");
	old.set(value, SlotValue::Scalar(Scalar::Int32(3))).expect("value fits");
	let a = old.global_slot("a").expect("a");
	let b = old.global_slot("b").expect("b");
	old.assign_handle(a, Some(foo)).expect("assign a");
	old.assign_handle(b, Some(foo)).expect("assign b");

	let snapshot = snapshot_globals(&old, &HostTypeRegistry::with_defaults());
	assert_eq!(snapshot.instances.len(), 1);
	let key_a = match &snapshot.global("a").expect("a captured").value {
		VariantValue::ObjectHandle { key } => key.expect("a not null"),
		other => panic!("unexpected capture {other:?}"),
	};
	let key_b = match &snapshot.global("b").expect("b captured").value {
		VariantValue::ObjectHandle { key } => key.expect("b not null"),
		other => panic!("unexpected capture {other:?}"),
	};
	assert_eq!(key_a, key_b);
	assert_eq!(snapshot.instances.get(key_a).expect("entry").origin, InstanceOrigin::Handle);

	let mut new = build(&mut engine, "class Foo { int value; int extra; } int global_counter = 0; Foo@ a; Foo@ b;");
	let report = restore_globals(snapshot, &mut new, &HostTypeRegistry::with_defaults());
	drop(old);

	assert_eq!(report.constructed_on_demand, 0);
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
	assert_eq!(new.scalar("global_counter"), Some(Scalar::Int32(5)));

	let a = new.object("a").expect("a restored");
	let b = new.object("b").expect("b restored");
	assert_eq!(a, b);
	assert_ne!(a, foo);
	assert!(matches!(new.field(a, "value"), Some(SlotValue::Scalar(Scalar::Int32(3)))));
	assert!(matches!(new.field(a, "extra"), Some(SlotValue::Scalar(Scalar::Int32(0)))));
	assert_eq!(new.refcount(a), Some(2));
	assert_eq!(new.refcount(foo), None);
}

#[test]
fn handle_reached_before_its_value_slot_is_fixed_up() {
	let text = "class Node { int id; Node@ peer; } Node@ first; Node held;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let held = old.object("held").expect("held object");
	let id = old.field_slot(held, "id").expect("id field");
	old.set(id, SlotValue::Scalar(Scalar::Int32(42))).expect("id fits");
	let first = old.global_slot("first").expect("first");
	old.assign_handle(first, Some(held)).expect("assign first");

	let snapshot = snapshot_globals(&old, &HostTypeRegistry::with_defaults());
	assert_eq!(snapshot.instances.len(), 1);
	assert_eq!(snapshot.instances.iter().next().expect("entry").origin, InstanceOrigin::Value);

	let (new, report) = {
		let mut new = build(&mut engine, text);
		let report = restore_globals(snapshot, &mut new, &HostTypeRegistry::with_defaults());
		drop(old);
		(new, report)
	};

	assert_eq!(report.fixups_applied, 1);
	assert_eq!(report.constructed_on_demand, 0);
	let held = new.object("held").expect("held object");
	assert_eq!(new.object("first"), Some(held));
	assert!(matches!(new.field(held, "id"), Some(SlotValue::Scalar(Scalar::Int32(42)))));
	assert_eq!(new.refcount(held), Some(2));
}

#[test]
fn back_references_resolve_through_on_demand_construction() {
	let text = "class Node { int id; Node@ next; Node@ back; } Node@ head;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let first = old.new_object("Node").expect("Node class");
	let second = old.new_object("Node").expect("Node class");
	for (object, id) in [(first, 1), (second, 2)] {
		let slot = old.field_slot(object, "id").expect("id field");
		old.set(slot, SlotValue::Scalar(Scalar::Int32(id))).expect("id fits");
	}
	old.assign_handle(old.field_slot(first, "next").expect("next"), Some(second)).expect("link next");
	old.assign_handle(old.field_slot(second, "back").expect("back"), Some(first)).expect("link back");
	old.assign_handle(old.global_slot("head").expect("head"), Some(first)).expect("assign head");

	let (new, report) = reload(&mut engine, old, text);
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);

	let head = new.object("head").expect("head restored");
	let Some(SlotValue::ObjectHandle(Some(next))) = new.field(head, "next") else {
		panic!("head.next restored");
	};
	assert!(matches!(new.field(next, "id"), Some(SlotValue::Scalar(Scalar::Int32(2)))));
	assert!(matches!(new.field(next, "back"), Some(SlotValue::ObjectHandle(Some(back))) if back == head));
	assert_eq!(new.refcount(head), Some(2));
	assert_eq!(new.refcount(next), Some(1));
}

#[test]
fn value_field_built_with_its_owner_is_not_built_twice() {
	let text = "class Foo { int v; } class Holder { Foo f; } Holder held; Holder@ hh; Foo@ fh;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let held = old.object("held").expect("held object");
	let Some(SlotValue::Object(inner)) = old.field(held, "f") else {
		panic!("held.f holds an object");
	};
	old.set(old.field_slot(inner, "v").expect("v field"), SlotValue::Scalar(Scalar::Int32(6))).expect("v fits");
	old.assign_handle(old.global_slot("hh").expect("hh"), Some(held)).expect("assign hh");
	old.assign_handle(old.global_slot("fh").expect("fh"), Some(inner)).expect("assign fh");

	let (new, report) = reload(&mut engine, old, "class Foo { int v; } class Holder { Foo f; } Holder@ hh; Foo@ fh;");
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
	assert_eq!(report.vanished_globals, vec!["held".to_owned()]);
	assert_eq!(report.constructed_on_demand, 1);
	assert_eq!(report.fixups_applied, 2);

	let holder = new.object("hh").expect("hh restored");
	let Some(SlotValue::Object(field)) = new.field(holder, "f") else {
		panic!("hh.f holds an object");
	};
	assert_eq!(new.object("fh"), Some(field));
	assert!(matches!(new.field(field, "v"), Some(SlotValue::Scalar(Scalar::Int32(6)))));
	assert_eq!(new.refcount(holder), Some(1));
	assert_eq!(new.refcount(field), Some(2));
}

#[test]
fn field_and_element_handles_are_fixed_up_to_the_value_slot() {
	let text = "class Foo { int id; Foo@ peer; } array<Foo@> list; Foo@ other; Foo held;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let held = old.object("held").expect("held object");
	old.set(old.field_slot(held, "id").expect("id field"), SlotValue::Scalar(Scalar::Int32(7))).expect("id fits");
	let list = old.array("list").expect("list array");
	old.resize_array(list, 1).expect("resize list");
	old.assign_handle(Slot::Element(list, 0), Some(held)).expect("assign list[0]");
	let other = old.new_object("Foo").expect("Foo class");
	old.assign_handle(old.global_slot("other").expect("other"), Some(other)).expect("assign other");
	old.assign_handle(old.field_slot(other, "peer").expect("peer field"), Some(held)).expect("link peer");

	let (new, report) = reload(&mut engine, old, text);
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
	assert_eq!(report.fixups_applied, 2);

	let held = new.object("held").expect("held object");
	assert!(matches!(new.field(held, "id"), Some(SlotValue::Scalar(Scalar::Int32(7)))));
	let list = new.array("list").expect("list array");
	assert_eq!(new.array_len(list), 1);
	assert!(matches!(new.read_slot(Slot::Element(list, 0)), Some(SlotValue::ObjectHandle(Some(object))) if object == held));
	let other = new.object("other").expect("other restored");
	assert!(matches!(new.field(other, "peer"), Some(SlotValue::ObjectHandle(Some(object))) if object == held));
	assert_eq!(new.refcount(held), Some(3));
	assert_eq!(new.refcount(other), Some(1));
}

#[test]
fn host_handles_keep_balanced_refcounts() {
	let text = "IMText@ label; MovementObject@ player; IMText@ unused;";
	let mut engine = SandboxEngine::new();
	let host = CountedHost::new("IMText");
	let mut old = build(&mut engine, text);

	let label = old.global_slot("label").expect("label");
	old.assign_host(label, host.clone()).expect("assign label");
	set(&mut old, "player", SlotValue::HostHandle(HostHandleValue::Scene(SceneObjectId(7))));
	assert_eq!(host.refs(), 2);

	let registry = HostTypeRegistry::with_defaults();
	let snapshot = snapshot_globals(&old, &registry);
	assert_eq!(host.refs(), 3);

	let mut new = build(&mut engine, text);
	let report = restore_globals(snapshot, &mut new, &registry);
	assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
	assert_eq!(host.refs(), 3);

	drop(old);
	assert_eq!(host.refs(), 2);
	assert!(matches!(new.global("label"), Some(SlotValue::HostHandle(HostHandleValue::Shared(object))) if Rc::ptr_eq(&object, &(host.clone() as Rc<dyn HostObject>))));
	assert!(matches!(new.global("player"), Some(SlotValue::HostHandle(HostHandleValue::Scene(SceneObjectId(7))))));
	assert!(matches!(new.global("unused"), Some(SlotValue::HostHandle(HostHandleValue::Null))));

	drop(new);
	assert_eq!(host.refs(), 1);
}

#[test]
fn dropping_a_snapshot_without_restore_releases_everything() {
	let text = "class Foo { int value; } Foo@ a; IMText@ label;";
	let mut engine = SandboxEngine::new();
	let host = CountedHost::new("IMText");
	let mut old = build(&mut engine, text);

	let foo = old.new_object("Foo").expect("Foo class");
	old.assign_handle(old.global_slot("a").expect("a"), Some(foo)).expect("assign a");
	old.assign_host(old.global_slot("label").expect("label"), host.clone()).expect("assign label");

	let snapshot: Snapshot = snapshot_globals(&old, &HostTypeRegistry::with_defaults());
	assert_eq!(host.refs(), 3);
	assert_eq!(old.refcount(foo), Some(1));

	drop(snapshot);
	assert_eq!(host.refs(), 2);
	assert_eq!(old.refcount(foo), Some(1));

	drop(old);
	assert_eq!(host.refs(), 1);
	assert_eq!(engine.live_objects(), 0);
}

#[test]
fn reload_leaves_no_script_objects_behind() {
	let text = "class Foo { int value; Foo@ next; } Foo@ a; Foo@ b; Foo held;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let shared = old.new_object("Foo").expect("Foo class");
	old.assign_handle(old.global_slot("a").expect("a"), Some(shared)).expect("assign a");
	old.assign_handle(old.global_slot("b").expect("b"), Some(shared)).expect("assign b");
	let held = old.object("held").expect("held");
	old.assign_handle(old.field_slot(shared, "next").expect("next"), Some(held)).expect("link next");

	let (new, _) = reload(&mut engine, old, text);
	assert_eq!(engine.live_objects(), 2);

	drop(new);
	assert_eq!(engine.live_objects(), 0);
}

#[test]
fn dictionaries_and_unknown_handles_are_skipped() {
	let text = "dictionary lookup; Gadget@ gadget; IMText widget; int kept = 1;";
	let mut engine = SandboxEngine::new();
	let old = build(&mut engine, text);
	let snapshot = snapshot_globals(&old, &HostTypeRegistry::with_defaults());

	let reason = |name: &str| match &snapshot.global(name).expect("captured").value {
		VariantValue::Skipped { reason, .. } => Some(*reason),
		_ => None,
	};
	assert_eq!(reason("lookup"), Some(SkipReason::AssociativeContainer));
	assert_eq!(reason("gadget"), Some(SkipReason::UnknownHostHandle));
	assert_eq!(reason("widget"), Some(SkipReason::NotRestorable));
	assert_eq!(reason("kept"), None);
	assert_eq!(snapshot.issues.len(), 3);

	let mut new = build(&mut engine, text);
	let report = restore_globals(snapshot, &mut new, &HostTypeRegistry::with_defaults());
	assert!(report.issues.is_empty());
	assert!(matches!(new.global("lookup"), Some(SlotValue::Opaque)));
}

#[test]
fn vanished_globals_types_and_fields_are_reported() {
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, "class Foo { int value; int gone; } class Bar { int id; } Bar@ bar; Foo@ foo; int removed = 4; int frozen = 2; int level = 1;");

	let bar = old.new_object("Bar").expect("Bar class");
	old.assign_handle(old.global_slot("bar").expect("bar"), Some(bar)).expect("assign bar");
	let foo = old.new_object("Foo").expect("Foo class");
	old.assign_handle(old.global_slot("foo").expect("foo"), Some(foo)).expect("assign foo");
	set(&mut old, "level", SlotValue::Scalar(Scalar::Int32(6)));

	let (new, report) = reload(&mut engine, old, "class Foo { int value; } class Baz { int id; } Baz@ bar; Foo@ foo; const int frozen = 9; float level;");

	assert_eq!(report.vanished_globals, vec!["removed".to_owned(), "frozen".to_owned()]);
	let paths: Vec<&str> = report.issues.iter().map(|issue| issue.path.as_str()).collect();
	assert!(paths.contains(&"Bar"), "missing type issue in {paths:?}");
	assert!(paths.contains(&"Foo.gone"), "missing field issue in {paths:?}");
	assert!(paths.contains(&"level"), "missing type change issue in {paths:?}");

	assert!(matches!(new.global("bar"), Some(SlotValue::ObjectHandle(None))));
	assert!(new.object("foo").is_some());
	assert_eq!(new.scalar("level"), Some(Scalar::Float(0.0)));
	assert_eq!(new.scalar("frozen"), Some(Scalar::Int32(9)));
}

#[test]
fn snapshot_renders_and_serializes_globals() {
	let text = "class Node { int value; Node@ next; } int global_counter = 5; Node@ head; Node@ tail;";
	let mut engine = SandboxEngine::new();
	let mut old = build(&mut engine, text);

	let node = old.new_object("Node").expect("Node class");
	old.set(old.field_slot(node, "value").expect("value"), SlotValue::Scalar(Scalar::Int32(3))).expect("value fits");
	old.assign_handle(old.field_slot(node, "next").expect("next"), Some(node)).expect("self link");
	old.assign_handle(old.global_slot("head").expect("head"), Some(node)).expect("assign head");

	let snapshot = snapshot_globals(&old, &HostTypeRegistry::with_defaults());
	let rendered = snapshot.render();
	assert!(rendered.contains("int32 global_counter = 5"), "{rendered}");
	assert!(rendered.contains("(cycle)"), "{rendered}");

	let json = serde_json::to_value(&snapshot).expect("snapshot serializes");
	assert_eq!(json["instances"]["entries"].as_array().map(Vec::len), Some(1));

	// Break the self link so the old module frees the node on drop.
	old.assign_handle(old.field_slot(node, "next").expect("next"), None).expect("unlink");
}
