use serde::Serialize;
use tracing::{debug, error, warn};

use crate::reload::host::{HostHandle, HostHandleValue, HostTypeEntry, HostTypeRegistry, HostValue};
use crate::reload::runtime::{GlobalVar, ObjectId, ScriptModule, Slot, SlotValue, TypeDesc};
use crate::reload::snapshot::{InstanceOrigin, InstanceTable, Snapshot};
use crate::reload::variant::{Container, OriginKey, Variant, VariantValue};

/// Deferred handle write whose target instance had not been restored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
	/// Slot that receives the handle.
	pub slot: Slot,
	/// Instance the handle points at.
	pub target: OriginKey,
}

/// One value that could not be written into the new module.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreIssue {
	/// Dotted path of the slot.
	pub path: String,
	/// What went wrong.
	pub message: String,
}

/// Summary of one restore pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
	/// Globals written into the new module.
	pub restored_globals: usize,
	/// Captured globals the new module no longer declares.
	pub vanished_globals: Vec<String>,
	/// Instances created without a value slot to live in.
	pub constructed_on_demand: usize,
	/// Deferred handle writes replayed after the main pass.
	pub fixups_applied: usize,
	/// Values that were dropped.
	pub issues: Vec<RestoreIssue>,
}

/// Write a snapshot into the globals of a freshly compiled module.
///
/// Consumes the snapshot; capture-time host references are released when it
/// is dropped at the end of the pass.
pub fn restore_globals<M: ScriptModule + ?Sized>(snapshot: Snapshot, module: &mut M, registry: &HostTypeRegistry) -> RestoreReport {
	let Snapshot { root, instances, .. } = snapshot;
	let globals = module.globals();
	let mut restorer = Restorer::new(module, registry, instances);

	for var in &root {
		let Some((index, decl)) = module_global(&globals, &*restorer.module, &var.name) else {
			debug!(global = var.name.as_ref(), "global no longer exists");
			restorer.report.vanished_globals.push(var.name.to_string());
			continue;
		};
		if decl.is_const {
			debug!(global = var.name.as_ref(), "global became const");
			restorer.report.vanished_globals.push(var.name.to_string());
			continue;
		}

		restorer.restore_slot(var, &decl.ty, Slot::Global(index), &var.name);
		restorer.report.restored_globals += 1;
	}

	restorer.finish()
}

fn module_global<'g, M: ScriptModule + ?Sized>(globals: &'g [GlobalVar], module: &M, name: &str) -> Option<(usize, &'g GlobalVar)> {
	let index = module.global_index(name)?;
	globals.get(index).map(|decl| (index, decl))
}

/// Writes captured variants into new slots, sharing one instance table and fixup list.
pub struct Restorer<'a, M: ScriptModule + ?Sized> {
	module: &'a mut M,
	registry: &'a HostTypeRegistry,
	instances: InstanceTable,
	fixups: Vec<Fixup>,
	report: RestoreReport,
}

impl<'a, M: ScriptModule + ?Sized> Restorer<'a, M> {
	/// Start a restore pass into `module`.
	pub fn new(module: &'a mut M, registry: &'a HostTypeRegistry, instances: InstanceTable) -> Self {
		Self {
			module,
			registry,
			instances,
			fixups: Vec::new(),
			report: RestoreReport::default(),
		}
	}

	/// Write `var` into `slot`, declared in the new module as `ty`.
	pub fn restore_slot(&mut self, var: &Variant, ty: &TypeDesc, slot: Slot, path: &str) {
		match (&var.value, ty) {
			(VariantValue::Skipped { .. }, _) => {}
			(VariantValue::Scalar { value }, TypeDesc::Primitive(kind)) if value.kind() == *kind => {
				self.write(slot, SlotValue::Scalar(*value), path);
			}
			(VariantValue::Enum { bytes, .. }, TypeDesc::Enum { size, .. }) if bytes.len() == *size => {
				self.write(slot, SlotValue::Enum(bytes.clone()), path);
			}
			(VariantValue::HostValue { type_name, value }, TypeDesc::HostValue { name }) if type_name.as_ref() == name => {
				self.restore_host_value(name, value, slot, path);
			}
			(VariantValue::HostHandle { type_name, handle }, TypeDesc::HostHandle { name }) if type_name.as_ref() == name => {
				self.restore_host_handle(handle, slot, path);
			}
			(VariantValue::Object { key }, TypeDesc::Object(_)) => self.restore_object_value(*key, slot, path),
			(VariantValue::ObjectHandle { key: None }, TypeDesc::ObjectHandle(_)) => {
				self.write(slot, SlotValue::ObjectHandle(None), path);
			}
			(VariantValue::ObjectHandle { key: Some(key) }, TypeDesc::ObjectHandle(_)) => self.restore_object_handle(*key, slot, path),
			(VariantValue::Container(container), TypeDesc::Array { element }) => self.restore_array(container, element, slot, path),
			(value, ty) => {
				let message = format!("captured {} does not fit declared type {}", value.kind_str(), ty.display_name());
				warn!(path, "{message}");
				self.issue(path, message);
			}
		}
	}

	/// Construct pending instances, replay fixups, and drop the table's own references.
	pub fn finish(mut self) -> RestoreReport {
		let pending: Vec<OriginKey> = self
			.instances
			.iter()
			.filter(|entry| entry.restored.is_none() && !entry.reconstruction_started)
			.map(|entry| entry.instance.key)
			.collect();
		for key in pending {
			// A value field of an earlier construction may have restored this one already.
			let settled = self.instances.get(key).is_none_or(|entry| entry.restored.is_some() || entry.reconstruction_started);
			if settled {
				continue;
			}
			if self.construct(key).is_some() {
				self.report.constructed_on_demand += 1;
			}
		}

		for fixup in std::mem::take(&mut self.fixups) {
			let restored = self.instances.get(fixup.target).and_then(|entry| entry.restored);
			match restored {
				Some(object) => {
					self.write_object_handle(fixup.slot, object, "fixup");
					self.report.fixups_applied += 1;
				}
				None => {
					error!(instance = fixup.target.0, "No pointer created for script object");
					self.issue("fixup", format!("no object restored for instance #{}", fixup.target.0));
				}
			}
		}

		let keys: Vec<OriginKey> = self.instances.keys().collect();
		for key in keys {
			let Some(entry) = self.instances.get_mut(key) else {
				continue;
			};
			if !entry.owned {
				continue;
			}
			entry.owned = false;
			if let Some(object) = entry.restored {
				self.module.release(object);
			}
		}

		debug!(
			restored = self.report.restored_globals,
			vanished = self.report.vanished_globals.len(),
			on_demand = self.report.constructed_on_demand,
			fixups = self.report.fixups_applied,
			"restored module globals"
		);
		self.report
	}

	fn restore_host_value(&mut self, type_name: &str, value: &HostValue, slot: Slot, path: &str) {
		if matches!(value, HostValue::Unknown { .. }) {
			return;
		}

		match self.registry.value_entry(type_name) {
			Some(HostTypeEntry::Value(vtable)) => {
				let restored = (vtable.restore)(value);
				self.write(slot, SlotValue::Host(restored), path);
			}
			_ => {
				warn!(path, type_name, "host value type no longer restorable");
				self.issue(path, format!("host type {type_name} is not restorable"));
			}
		}
	}

	fn restore_host_handle(&mut self, handle: &HostHandle, slot: Slot, path: &str) {
		match handle {
			HostHandle::Null => {
				self.write(slot, SlotValue::HostHandle(HostHandleValue::Null), path);
			}
			HostHandle::Shared(shared) => {
				let object = shared.object().clone();
				if self.write(slot, SlotValue::HostHandle(HostHandleValue::Shared(object.clone())), path) {
					object.add_ref();
				}
			}
			HostHandle::Scene(id) => {
				self.write(slot, SlotValue::HostHandle(HostHandleValue::Scene(*id)), path);
			}
		}
	}

	fn restore_object_value(&mut self, key: OriginKey, slot: Slot, path: &str) {
		let Some(SlotValue::Object(object)) = self.module.read_slot(slot) else {
			self.issue(path, "new slot holds no object".to_owned());
			return;
		};
		let Some(entry) = self.instances.get_mut(key) else {
			self.issue(path, format!("instance #{} missing from snapshot", key.0));
			return;
		};
		if entry.restored.is_some() {
			self.issue(path, format!("instance #{} already restored", key.0));
			return;
		}

		entry.restored = Some(object);
		entry.reconstruction_started = true;
		self.restore_fields(key, object, path);
	}

	fn restore_object_handle(&mut self, key: OriginKey, slot: Slot, path: &str) {
		let Some(entry) = self.instances.get(key) else {
			self.issue(path, format!("instance #{} missing from snapshot", key.0));
			return;
		};
		let (restored, origin, started) = (entry.restored, entry.origin, entry.reconstruction_started);

		if let Some(object) = restored {
			self.write_object_handle(slot, object, path);
			return;
		}

		match (origin, started) {
			(InstanceOrigin::Handle, false) => {
				if let Some(object) = self.construct(key) {
					self.write_object_handle(slot, object, path);
				}
			}
			(InstanceOrigin::Value, false) => self.fixups.push(Fixup { slot, target: key }),
			(_, true) => {
				debug!(path, key = key.0, "instance has no restored object, handle stays null");
			}
		}
	}

	fn construct(&mut self, key: OriginKey) -> Option<ObjectId> {
		let entry = self.instances.get_mut(key)?;
		if let Some(object) = entry.restored {
			return Some(object);
		}
		entry.reconstruction_started = true;
		let type_name = entry.instance.type_name.to_string();
		let namespace = entry.instance.namespace.as_deref().map(str::to_owned);
		let qualified = entry.instance.qualified_name();

		let Some(ty) = self.module.lookup_type(&type_name, namespace.as_deref()) else {
			error!("No matching typename {qualified} in recompiled module");
			self.issue(&qualified, "type no longer exists".to_owned());
			return None;
		};
		let Some(object) = self.module.create_uninitialized(&ty) else {
			error!("Unable to create instance of {qualified}");
			self.issue(&qualified, "instance could not be created".to_owned());
			return None;
		};

		if let Some(entry) = self.instances.get_mut(key) {
			entry.restored = Some(object);
			entry.owned = true;
		}
		self.restore_fields(key, object, &qualified);
		Some(object)
	}

	fn restore_fields(&mut self, key: OriginKey, object: ObjectId, path: &str) {
		let Some(entry) = self.instances.get_mut(key) else {
			return;
		};
		let fields = std::mem::take(&mut entry.instance.fields);
		let decls = self.module.object_fields(object);

		for field in &fields {
			let field_path = format!("{path}.{}", field.name);
			match decls.iter().position(|decl| decl.name == field.name.as_ref()) {
				Some(index) => self.restore_slot(field, &decls[index].ty, Slot::Field(object, index), &field_path),
				None => {
					warn!(path = field_path.as_str(), "field no longer exists");
					self.issue(&field_path, "field no longer exists".to_owned());
				}
			}
		}

		if let Some(entry) = self.instances.get_mut(key) {
			entry.instance.fields = fields;
		}
	}

	fn restore_array(&mut self, container: &Container, element: &TypeDesc, slot: Slot, path: &str) {
		let Some(SlotValue::Array(array)) = self.module.read_slot(slot) else {
			self.issue(path, "new slot holds no array".to_owned());
			return;
		};
		if let Err(err) = self.module.resize_array(array, container.items.len()) {
			warn!(path, "array resize failed: {err}");
			self.issue(path, err.to_string());
			return;
		}

		for (index, item) in container.items.iter().enumerate() {
			let item_path = format!("{path}[{index}]");
			self.restore_slot(item, element, Slot::Element(array, index), &item_path);
		}
	}

	fn write_object_handle(&mut self, slot: Slot, object: ObjectId, path: &str) {
		if self.write(slot, SlotValue::ObjectHandle(Some(object)), path) {
			self.module.add_ref(object);
		}
	}

	fn write(&mut self, slot: Slot, value: SlotValue, path: &str) -> bool {
		match self.module.write_slot(slot, value) {
			Ok(()) => true,
			Err(err) => {
				warn!(path, "write failed: {err}");
				self.issue(path, err.to_string());
				false
			}
		}
	}

	fn issue(&mut self, path: &str, message: String) {
		self.report.issues.push(RestoreIssue {
			path: path.to_owned(),
			message,
		});
	}
}
