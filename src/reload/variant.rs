use serde::Serialize;

use crate::reload::host::{HostHandle, HostValue};
use crate::reload::runtime::Scalar;

/// Stable key of a captured user-object instance inside one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OriginKey(pub u32);

impl OriginKey {
	/// Position in the instance table.
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

/// One captured, named value.
#[derive(Debug, Clone, Serialize)]
pub struct Variant {
	/// Declared variable or field name. Empty for array elements.
	pub name: Box<str>,
	/// Captured contents.
	pub value: VariantValue,
}

/// Captured contents of a slot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantValue {
	/// Primitive scalar.
	Scalar {
		/// Copied value.
		value: Scalar,
	},
	/// Raw enum bytes.
	Enum {
		/// Enum type name.
		type_name: Box<str>,
		/// Storage bytes.
		bytes: Vec<u8>,
	},
	/// Host value type.
	HostValue {
		/// Host type name.
		type_name: Box<str>,
		/// Copied value.
		value: HostValue,
	},
	/// Host handle.
	HostHandle {
		/// Host type name.
		type_name: Box<str>,
		/// Captured handle; shared handles hold one reference.
		handle: HostHandle,
	},
	/// User object stored by value in this slot.
	Object {
		/// Instance table key.
		key: OriginKey,
	},
	/// Handle to a user object.
	ObjectHandle {
		/// Instance table key, `None` for a null handle.
		key: Option<OriginKey>,
	},
	/// Dynamically sized array.
	Container(Container),
	/// Slot that could not be captured.
	Skipped {
		/// Declared type name.
		type_name: Box<str>,
		/// Why the slot was skipped.
		reason: SkipReason,
	},
}

/// Ordered elements sharing one declared element type.
#[derive(Debug, Clone, Serialize)]
pub struct Container {
	/// Declared element type name.
	pub element_type: Box<str>,
	/// Captured elements.
	pub items: Vec<Variant>,
}

/// Why a slot was not captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	/// Dictionaries and other associative containers.
	AssociativeContainer,
	/// Handle to an array.
	ContainerHandle,
	/// Host handle type not present in the registry.
	UnknownHostHandle,
	/// Host value type that resets on reload.
	NotRestorable,
	/// Type the runtime could not classify.
	UnknownType,
	/// Slot contents did not match the declared type.
	Unreadable,
}

impl SkipReason {
	/// Stable lowercase label.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AssociativeContainer => "associative_container",
			Self::ContainerHandle => "container_handle",
			Self::UnknownHostHandle => "unknown_host_handle",
			Self::NotRestorable => "not_restorable",
			Self::UnknownType => "unknown_type",
			Self::Unreadable => "unreadable",
		}
	}
}

/// Captured user-object instance.
#[derive(Debug, Clone, Serialize)]
pub struct UserObjectInstance {
	/// Class name.
	pub type_name: Box<str>,
	/// Declaring namespace.
	pub namespace: Option<Box<str>>,
	/// Key of this instance in its snapshot.
	pub key: OriginKey,
	/// Fields in declaration order of the source class.
	pub fields: Vec<Variant>,
}

impl UserObjectInstance {
	/// `ns::Name` or `Name`.
	pub fn qualified_name(&self) -> String {
		match &self.namespace {
			Some(ns) => format!("{ns}::{}", self.type_name),
			None => self.type_name.to_string(),
		}
	}
}

impl Variant {
	/// Build a variant.
	pub fn new(name: &str, value: VariantValue) -> Self {
		Self { name: name.into(), value }
	}

	/// Instance key this variant points at, by value or by handle.
	pub fn instance_key(&self) -> Option<OriginKey> {
		match &self.value {
			VariantValue::Object { key } => Some(*key),
			VariantValue::ObjectHandle { key } => *key,
			_ => None,
		}
	}
}

impl VariantValue {
	/// Stable lowercase kind label.
	pub fn kind_str(&self) -> &'static str {
		match self {
			Self::Scalar { .. } => "scalar",
			Self::Enum { .. } => "enum",
			Self::HostValue { .. } => "host_value",
			Self::HostHandle { .. } => "host_handle",
			Self::Object { .. } => "object",
			Self::ObjectHandle { .. } => "object_handle",
			Self::Container(_) => "container",
			Self::Skipped { .. } => "skipped",
		}
	}
}
