use std::collections::HashMap;
use std::rc::Rc;

use scriptreload::reload::{ArrayId, FieldDecl, HostHandleValue, HostTypeEntry, HostTypeRegistry, ObjectId, ObjectType, SlotValue, TypeDesc};

const MAX_VALUE_NESTING: usize = 16;

/// Resolved class of a sandbox module.
#[derive(Debug)]
pub(crate) struct ClassInfo {
	pub ty: ObjectType,
	pub fields: Vec<FieldDecl>,
	pub inits: Vec<Option<SlotValue>>,
}

#[derive(Debug)]
pub(crate) struct HeapObject {
	pub class: Rc<ClassInfo>,
	pub fields: Vec<SlotValue>,
	pub refcount: u32,
}

#[derive(Debug)]
pub(crate) struct HeapArray {
	pub element: TypeDesc,
	pub items: Vec<SlotValue>,
}

/// Object and array storage shared by every module of one engine.
#[derive(Debug, Default)]
pub(crate) struct Heap {
	pub objects: HashMap<u64, HeapObject>,
	pub arrays: HashMap<u64, HeapArray>,
	next_id: u64,
}

/// Class lookup and host registry needed to build default values.
pub(crate) struct Layout<'a> {
	pub classes: &'a [Rc<ClassInfo>],
	pub registry: &'a HostTypeRegistry,
}

impl Layout<'_> {
	pub(crate) fn class(&self, ty: &ObjectType) -> Option<&Rc<ClassInfo>> {
		self.classes.iter().find(|class| class.ty == *ty)
	}
}

impl Heap {
	fn next(&mut self) -> u64 {
		self.next_id += 1;
		self.next_id
	}

	/// Allocate a default-initialized object with `refcount` references.
	pub(crate) fn alloc_object(&mut self, layout: &Layout<'_>, class: &Rc<ClassInfo>, refcount: u32) -> ObjectId {
		self.alloc_object_nested(layout, class, refcount, 0)
	}

	fn alloc_object_nested(&mut self, layout: &Layout<'_>, class: &Rc<ClassInfo>, refcount: u32, depth: usize) -> ObjectId {
		let mut fields = Vec::with_capacity(class.fields.len());
		for (field, init) in class.fields.iter().zip(&class.inits) {
			let value = match init {
				Some(value) => value.clone(),
				None => self.default_nested(layout, &field.ty, depth + 1),
			};
			fields.push(value);
		}

		let id = self.next();
		self.objects.insert(
			id,
			HeapObject {
				class: Rc::clone(class),
				fields,
				refcount,
			},
		);
		ObjectId(id)
	}

	/// Value a fresh slot of type `ty` holds.
	pub(crate) fn default_value(&mut self, layout: &Layout<'_>, ty: &TypeDesc) -> SlotValue {
		self.default_nested(layout, ty, 0)
	}

	fn default_nested(&mut self, layout: &Layout<'_>, ty: &TypeDesc, depth: usize) -> SlotValue {
		if depth > MAX_VALUE_NESTING {
			return SlotValue::Opaque;
		}

		match ty {
			TypeDesc::Primitive(kind) => SlotValue::Scalar(kind.zero()),
			TypeDesc::Enum { size, .. } => SlotValue::Enum(vec![0; *size]),
			TypeDesc::HostValue { name } => match layout.registry.value_entry(name) {
				Some(HostTypeEntry::Value(vtable)) => SlotValue::Host(vtable.kind.default_value()),
				_ => SlotValue::Opaque,
			},
			TypeDesc::HostHandle { .. } => SlotValue::HostHandle(HostHandleValue::Null),
			TypeDesc::Object(object_type) => match layout.class(object_type) {
				Some(class) => {
					let class = Rc::clone(class);
					SlotValue::Object(self.alloc_object_nested(layout, &class, 1, depth))
				}
				None => SlotValue::Opaque,
			},
			TypeDesc::ObjectHandle(_) => SlotValue::ObjectHandle(None),
			TypeDesc::Array { element } => {
				let id = self.next();
				self.arrays.insert(
					id,
					HeapArray {
						element: (**element).clone(),
						items: Vec::new(),
					},
				);
				SlotValue::Array(ArrayId(id))
			}
			TypeDesc::ArrayHandle { .. } | TypeDesc::Dictionary { .. } | TypeDesc::Unknown { .. } => SlotValue::Opaque,
		}
	}

	pub(crate) fn add_ref(&mut self, object: ObjectId) {
		if let Some(entry) = self.objects.get_mut(&object.0) {
			entry.refcount += 1;
		}
	}

	pub(crate) fn release(&mut self, object: ObjectId) {
		let Some(entry) = self.objects.get_mut(&object.0) else {
			return;
		};
		entry.refcount = entry.refcount.saturating_sub(1);
		if entry.refcount > 0 {
			return;
		}

		if let Some(dead) = self.objects.remove(&object.0) {
			for field in dead.fields {
				self.release_value(field);
			}
		}
	}

	/// Drop whatever references `value` owns.
	pub(crate) fn release_value(&mut self, value: SlotValue) {
		match value {
			SlotValue::Object(object) | SlotValue::ObjectHandle(Some(object)) => self.release(object),
			SlotValue::Array(array) => {
				if let Some(dead) = self.arrays.remove(&array.0) {
					for item in dead.items {
						self.release_value(item);
					}
				}
			}
			SlotValue::HostHandle(HostHandleValue::Shared(host)) => host.release(),
			_ => {}
		}
	}

	/// Whether `value` may be stored in a slot declared as `ty`.
	pub(crate) fn fits(&self, value: &SlotValue, ty: &TypeDesc) -> bool {
		match (value, ty) {
			(SlotValue::Scalar(scalar), TypeDesc::Primitive(kind)) => scalar.kind() == *kind,
			(SlotValue::Enum(bytes), TypeDesc::Enum { size, .. }) => bytes.len() == *size,
			(SlotValue::Host(_), TypeDesc::HostValue { .. }) => true,
			(SlotValue::HostHandle(_), TypeDesc::HostHandle { .. }) => true,
			(SlotValue::ObjectHandle(None), TypeDesc::ObjectHandle(_)) => true,
			(SlotValue::ObjectHandle(Some(object)) | SlotValue::Object(object), TypeDesc::ObjectHandle(declared) | TypeDesc::Object(declared)) => {
				matches!(value, SlotValue::Object(_)) == matches!(ty, TypeDesc::Object(_)) && self.objects.get(&object.0).is_some_and(|entry| entry.class.ty == *declared)
			}
			(SlotValue::Array(_), TypeDesc::Array { .. }) => true,
			(SlotValue::Opaque, TypeDesc::ArrayHandle { .. } | TypeDesc::Dictionary { .. } | TypeDesc::Unknown { .. } | TypeDesc::HostValue { .. }) => true,
			_ => false,
		}
	}
}
