use tracing::{debug, error, warn};

use crate::reload::host::{HandleOwnership, HostHandle, HostHandleValue, HostTypeEntry, HostTypeRegistry, HostValue, SharedHostRef};
use crate::reload::runtime::{ObjectId, ObjectType, ScriptModule, Slot, SlotValue, TypeDesc};
use crate::reload::snapshot::{InstanceOrigin, InstanceTable, Snapshot, SnapshotIssue};
use crate::reload::variant::{Container, OriginKey, SkipReason, Variant, VariantValue};

/// Capture every non-const global of `module` into a detached snapshot.
///
/// Never fails: slots that can not be carried over are recorded as
/// [`VariantValue::Skipped`] and listed in [`Snapshot::issues`].
pub fn snapshot_globals<M: ScriptModule + ?Sized>(module: &M, registry: &HostTypeRegistry) -> Snapshot {
	let mut capturer = Capturer::new(module, registry);
	let mut root = Vec::new();

	for (index, global) in module.globals().into_iter().enumerate() {
		if global.is_const {
			continue;
		}
		let var = capturer.capture_slot(&global.name, &global.name, &global.ty, Slot::Global(index));
		root.push(var);
	}

	let Capturer { mut instances, issues, .. } = capturer;
	instances.detach_runtime();
	debug!(globals = root.len(), instances = instances.len(), issues = issues.len(), "captured module globals");

	Snapshot { root, instances, issues }
}

/// Walks runtime slots and fills one shared instance table.
pub struct Capturer<'a, M: ScriptModule + ?Sized> {
	module: &'a M,
	registry: &'a HostTypeRegistry,
	instances: InstanceTable,
	issues: Vec<SnapshotIssue>,
}

impl<'a, M: ScriptModule + ?Sized> Capturer<'a, M> {
	/// Start a capture pass over `module`.
	pub fn new(module: &'a M, registry: &'a HostTypeRegistry) -> Self {
		Self {
			module,
			registry,
			instances: InstanceTable::new(),
			issues: Vec::new(),
		}
	}

	/// Capture the slot at `slot`, declared as `ty`.
	///
	/// `path` names the slot in issue reports.
	pub fn capture_slot(&mut self, name: &str, path: &str, ty: &TypeDesc, slot: Slot) -> Variant {
		let value = match ty {
			TypeDesc::Primitive(kind) => match self.module.read_slot(slot) {
				Some(SlotValue::Scalar(value)) if value.kind() == *kind => VariantValue::Scalar { value },
				_ => self.skip(path, ty, SkipReason::Unreadable),
			},
			TypeDesc::Enum { name: type_name, size } => match self.module.read_slot(slot) {
				Some(SlotValue::Enum(bytes)) if bytes.len() == *size => VariantValue::Enum {
					type_name: type_name.as_str().into(),
					bytes,
				},
				_ => self.skip(path, ty, SkipReason::Unreadable),
			},
			TypeDesc::HostValue { name: type_name } => self.capture_host_value(path, ty, type_name, slot),
			TypeDesc::HostHandle { name: type_name } => self.capture_host_handle(path, ty, type_name, slot),
			TypeDesc::Object(declared) => self.capture_object_value(path, ty, declared, slot),
			TypeDesc::ObjectHandle(_) => self.capture_object_handle(path, ty, slot),
			TypeDesc::Array { element } => self.capture_array(path, ty, element, slot),
			TypeDesc::ArrayHandle { .. } => {
				warn!(path, "array handles are not carried across reload");
				self.skip(path, ty, SkipReason::ContainerHandle)
			}
			TypeDesc::Dictionary { .. } => {
				warn!(path, "Hotloading for dictionaries are not supported");
				self.skip(path, ty, SkipReason::AssociativeContainer)
			}
			TypeDesc::Unknown { name: type_name } => {
				warn!(path, type_name = type_name.as_str(), "unhandled type, value will not be kept");
				self.skip(path, ty, SkipReason::UnknownType)
			}
		};

		Variant::new(name, value)
	}

	fn capture_host_value(&mut self, path: &str, ty: &TypeDesc, type_name: &str, slot: Slot) -> VariantValue {
		match self.registry.value_entry(type_name) {
			Some(HostTypeEntry::Value(vtable)) => match self.module.read_slot(slot) {
				Some(SlotValue::Host(value)) if value.kind() == Some(vtable.kind) => VariantValue::HostValue {
					type_name: type_name.into(),
					value: (vtable.capture)(&value),
				},
				_ => self.skip(path, ty, SkipReason::Unreadable),
			},
			Some(HostTypeEntry::NotRestorable) => {
				warn!("{type_name} can not be stored by value in global space and reloaded, it will be reset to initial values. Variable name: {path}");
				self.skip(path, ty, SkipReason::NotRestorable)
			}
			Some(HostTypeEntry::Handle(_)) | None => {
				warn!(path, type_name, "unknown host value type");
				self.issues.push(SnapshotIssue {
					path: path.to_owned(),
					type_name: type_name.to_owned(),
					reason: SkipReason::UnknownType,
				});
				VariantValue::HostValue {
					type_name: type_name.into(),
					value: HostValue::Unknown {
						type_name: type_name.to_owned(),
					},
				}
			}
		}
	}

	fn capture_host_handle(&mut self, path: &str, ty: &TypeDesc, type_name: &str, slot: Slot) -> VariantValue {
		let Some(ownership) = self.registry.handle_entry(type_name) else {
			error!(path, type_name, "Unhandled handle type");
			return self.skip(path, ty, SkipReason::UnknownHostHandle);
		};

		let handle = match (ownership, self.module.read_slot(slot)) {
			(_, Some(SlotValue::HostHandle(HostHandleValue::Null))) => HostHandle::Null,
			(HandleOwnership::Shared, Some(SlotValue::HostHandle(HostHandleValue::Shared(object)))) => HostHandle::Shared(SharedHostRef::acquire(object)),
			(HandleOwnership::Scene, Some(SlotValue::HostHandle(HostHandleValue::Scene(id)))) => HostHandle::Scene(id),
			_ => return self.skip(path, ty, SkipReason::Unreadable),
		};

		VariantValue::HostHandle {
			type_name: type_name.into(),
			handle,
		}
	}

	fn capture_object_value(&mut self, path: &str, ty: &TypeDesc, declared: &ObjectType, slot: Slot) -> VariantValue {
		let Some(SlotValue::Object(object)) = self.module.read_slot(slot) else {
			return self.skip(path, ty, SkipReason::Unreadable);
		};

		if let Some(key) = self.instances.key_of(object) {
			if let Some(entry) = self.instances.get_mut(key) {
				entry.origin = InstanceOrigin::Value;
			}
			return VariantValue::Object { key };
		}

		let actual = self.module.object_type(object).unwrap_or_else(|| declared.clone());
		let key = self.instances.insert(object, &actual, InstanceOrigin::Value);
		self.capture_fields(key, object, path);
		VariantValue::Object { key }
	}

	fn capture_object_handle(&mut self, path: &str, ty: &TypeDesc, slot: Slot) -> VariantValue {
		let object = match self.module.read_slot(slot) {
			Some(SlotValue::ObjectHandle(None)) => return VariantValue::ObjectHandle { key: None },
			Some(SlotValue::ObjectHandle(Some(object))) => object,
			_ => return self.skip(path, ty, SkipReason::Unreadable),
		};

		if let Some(key) = self.instances.key_of(object) {
			return VariantValue::ObjectHandle { key: Some(key) };
		}

		let Some(actual) = self.module.object_type(object) else {
			return self.skip(path, ty, SkipReason::UnknownType);
		};
		let key = self.instances.insert(object, &actual, InstanceOrigin::Handle);
		self.capture_fields(key, object, path);
		VariantValue::ObjectHandle { key: Some(key) }
	}

	fn capture_fields(&mut self, key: OriginKey, object: ObjectId, path: &str) {
		let mut fields = Vec::new();
		for (index, field) in self.module.object_fields(object).iter().enumerate() {
			let field_path = format!("{path}.{}", field.name);
			fields.push(self.capture_slot(&field.name, &field_path, &field.ty, Slot::Field(object, index)));
		}

		if let Some(entry) = self.instances.get_mut(key) {
			entry.instance.fields = fields;
		}
	}

	fn capture_array(&mut self, path: &str, ty: &TypeDesc, element: &TypeDesc, slot: Slot) -> VariantValue {
		let Some(SlotValue::Array(array)) = self.module.read_slot(slot) else {
			return self.skip(path, ty, SkipReason::Unreadable);
		};

		let len = self.module.array_len(array);
		let mut items = Vec::with_capacity(len);
		for index in 0..len {
			let item_path = format!("{path}[{index}]");
			items.push(self.capture_slot("", &item_path, element, Slot::Element(array, index)));
		}

		VariantValue::Container(Container {
			element_type: element.display_name().into_boxed_str(),
			items,
		})
	}

	fn skip(&mut self, path: &str, ty: &TypeDesc, reason: SkipReason) -> VariantValue {
		let type_name = ty.display_name();
		debug!(path, type_name = type_name.as_str(), reason = reason.as_str(), "skipped slot");
		self.issues.push(SnapshotIssue {
			path: path.to_owned(),
			type_name: type_name.clone(),
			reason,
		});
		VariantValue::Skipped {
			type_name: type_name.into_boxed_str(),
			reason,
		}
	}
}
