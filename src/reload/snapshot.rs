use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::reload::host::{HostHandle, HostValue};
use crate::reload::runtime::{ObjectId, ObjectType};
use crate::reload::variant::{OriginKey, SkipReason, UserObjectInstance, Variant, VariantValue};

/// How an instance was first reached during capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceOrigin {
	/// Some slot stores the instance by value.
	Value,
	/// Only handles reference the instance.
	Handle,
}

/// Instance table row.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceEntry {
	/// Captured instance data.
	pub instance: UserObjectInstance,
	/// Value or handle origin.
	pub origin: InstanceOrigin,
	/// Object standing in for this instance in the new module.
	#[serde(skip)]
	pub restored: Option<ObjectId>,
	/// On-demand construction has begun.
	#[serde(skip)]
	pub reconstruction_started: bool,
	#[serde(skip)]
	pub(crate) owned: bool,
}

/// Arena of captured instances, addressed by [`OriginKey`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstanceTable {
	entries: Vec<InstanceEntry>,
	#[serde(skip)]
	by_runtime: HashMap<ObjectId, OriginKey>,
}

impl InstanceTable {
	/// Empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of captured instances.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether no instance was captured.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Entry for `key`.
	pub fn get(&self, key: OriginKey) -> Option<&InstanceEntry> {
		self.entries.get(key.index())
	}

	/// Mutable entry for `key`.
	pub fn get_mut(&mut self, key: OriginKey) -> Option<&mut InstanceEntry> {
		self.entries.get_mut(key.index())
	}

	/// Key already assigned to a live runtime object.
	pub fn key_of(&self, object: ObjectId) -> Option<OriginKey> {
		self.by_runtime.get(&object).copied()
	}

	/// Register a newly reached runtime object, returning its key.
	pub fn insert(&mut self, object: ObjectId, ty: &ObjectType, origin: InstanceOrigin) -> OriginKey {
		let key = OriginKey(self.entries.len() as u32);
		self.entries.push(InstanceEntry {
			instance: UserObjectInstance {
				type_name: ty.name.as_str().into(),
				namespace: ty.namespace.as_deref().map(Into::into),
				key,
				fields: Vec::new(),
			},
			origin,
			restored: None,
			reconstruction_started: false,
			owned: false,
		});
		self.by_runtime.insert(object, key);
		key
	}

	/// Iterate keys in capture order.
	pub fn keys(&self) -> impl Iterator<Item = OriginKey> {
		(0..self.entries.len() as u32).map(OriginKey)
	}

	/// Iterate entries in capture order.
	pub fn iter(&self) -> impl Iterator<Item = &InstanceEntry> {
		self.entries.iter()
	}

	/// Forget runtime identities once the source module is gone.
	pub(crate) fn detach_runtime(&mut self) {
		self.by_runtime.clear();
	}
}

/// One slot the capturer could not carry over.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotIssue {
	/// Dotted path of the slot, e.g. `enemies[2].label`.
	pub path: String,
	/// Declared type name.
	pub type_name: String,
	/// Why it was skipped.
	pub reason: SkipReason,
}

/// Captured global state of one module.
#[derive(Debug, Default, Serialize)]
pub struct Snapshot {
	/// One variant per non-const global, in declaration order.
	pub root: Vec<Variant>,
	/// Every captured user-object instance.
	pub instances: InstanceTable,
	/// Slots that were skipped.
	pub issues: Vec<SnapshotIssue>,
}

impl Snapshot {
	/// Captured global named `name`.
	pub fn global(&self, name: &str) -> Option<&Variant> {
		self.root.iter().find(|var| var.name.as_ref() == name)
	}

	/// Human-readable dump of every global, one line per value.
	pub fn render(&self) -> String {
		let mut out = String::new();
		for var in &self.root {
			let mut visiting = Vec::new();
			self.render_variant(&mut out, var, 0, &mut visiting);
		}
		out
	}

	fn render_variant(&self, out: &mut String, var: &Variant, depth: usize, visiting: &mut Vec<OriginKey>) {
		let indent = "  ".repeat(depth);
		let label = if var.name.is_empty() { "-".to_owned() } else { var.name.to_string() };

		match &var.value {
			VariantValue::Scalar { value } => {
				let _ = writeln!(out, "{indent}{} {label} = {value}", value.kind().as_str());
			}
			VariantValue::Enum { type_name, bytes } => {
				let _ = writeln!(out, "{indent}{type_name} {label} = {}", enum_value(bytes));
			}
			VariantValue::HostValue { type_name, value } => {
				let _ = writeln!(out, "{indent}{type_name} {label} = {}", host_value_label(value));
			}
			VariantValue::HostHandle { type_name, handle } => {
				let target = match handle {
					HostHandle::Null => "null".to_owned(),
					HostHandle::Shared(shared) => format!("<{}>", shared.object().type_name()),
					HostHandle::Scene(id) => format!("scene#{}", id.0),
				};
				let _ = writeln!(out, "{indent}{type_name}@ {label} = {target}");
			}
			VariantValue::Object { key } => self.render_instance(out, Row { indent: &indent, label: &label, depth }, *key, "", visiting),
			VariantValue::ObjectHandle { key: None } => {
				let _ = writeln!(out, "{indent}handle {label} = null");
			}
			VariantValue::ObjectHandle { key: Some(key) } => self.render_instance(out, Row { indent: &indent, label: &label, depth }, *key, "@", visiting),
			VariantValue::Container(container) => {
				let _ = writeln!(out, "{indent}array<{}> {label} [{}]", container.element_type, container.items.len());
				for item in &container.items {
					self.render_variant(out, item, depth + 1, visiting);
				}
			}
			VariantValue::Skipped { type_name, reason } => {
				let _ = writeln!(out, "{indent}{type_name} {label} skipped ({})", reason.as_str());
			}
		}
	}

	fn render_instance(&self, out: &mut String, row: Row<'_>, key: OriginKey, suffix: &str, visiting: &mut Vec<OriginKey>) {
		let Row { indent, label, depth } = row;
		let Some(entry) = self.instances.get(key) else {
			let _ = writeln!(out, "{indent}? {label} = #{} (missing)", key.0);
			return;
		};

		let type_name = entry.instance.qualified_name();
		if visiting.contains(&key) {
			let _ = writeln!(out, "{indent}{type_name}{suffix} {label} = #{} (cycle)", key.0);
			return;
		}

		let _ = writeln!(out, "{indent}{type_name}{suffix} {label} = #{}", key.0);
		visiting.push(key);
		for field in &entry.instance.fields {
			self.render_variant(out, field, depth + 1, visiting);
		}
		visiting.pop();
	}
}

struct Row<'a> {
	indent: &'a str,
	label: &'a str,
	depth: usize,
}

fn enum_value(bytes: &[u8]) -> i64 {
	let mut raw = [0_u8; 8];
	let take = bytes.len().min(8);
	raw[..take].copy_from_slice(&bytes[..take]);
	i64::from_le_bytes(raw)
}

fn host_value_label(value: &HostValue) -> String {
	match value {
		HostValue::Vec2(v) => format!("{v:?}"),
		HostValue::Vec3(v) => format!("{v:?}"),
		HostValue::Vec4(v) | HostValue::Quaternion(v) => format!("{v:?}"),
		HostValue::IVec2(v) => format!("{v:?}"),
		HostValue::IVec3(v) => format!("{v:?}"),
		HostValue::IVec4(v) => format!("{v:?}"),
		HostValue::Mat4(_) => "mat4".to_owned(),
		HostValue::BoneTransform { rotation, origin } => format!("{rotation:?} @ {origin:?}"),
		HostValue::String(text) | HostValue::Json(text) | HostValue::TextureAssetRef(text) => format!("{text:?}"),
		HostValue::ModId(id) => format!("mod#{id}"),
		HostValue::FontSetup { name, size, .. } => format!("{name:?} {size}pt"),
		HostValue::NavPath(points) => format!("path[{}]", points.len()),
		HostValue::AttackScriptGetter(path) => format!("attack {path:?}"),
		HostValue::ModLevel { id, title, .. } => format!("level {id:?} {title:?}"),
		HostValue::SpawnerItem { category, path, .. } => format!("item {category}/{path}"),
		HostValue::Unknown { type_name } => format!("<unknown {type_name}>"),
	}
}
