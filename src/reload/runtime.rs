use std::fmt;

use serde::Serialize;

use crate::reload::Result;
use crate::reload::host::{HostHandleValue, HostValue};

/// Primitive scalar kinds a runtime slot can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
	/// `bool`
	Bool,
	/// `int8`
	Int8,
	/// `int16`
	Int16,
	/// `int` / `int32`
	Int32,
	/// `int64`
	Int64,
	/// `uint8`
	UInt8,
	/// `uint16`
	UInt16,
	/// `uint` / `uint32`
	UInt32,
	/// `uint64`
	UInt64,
	/// `float`
	Float,
	/// `double`
	Double,
}

impl PrimitiveKind {
	/// Canonical script-facing name.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Bool => "bool",
			Self::Int8 => "int8",
			Self::Int16 => "int16",
			Self::Int32 => "int32",
			Self::Int64 => "int64",
			Self::UInt8 => "uint8",
			Self::UInt16 => "uint16",
			Self::UInt32 => "uint32",
			Self::UInt64 => "uint64",
			Self::Float => "float",
			Self::Double => "double",
		}
	}

	/// Parse a script type name, accepting the `int`/`uint` aliases.
	pub fn from_name(name: &str) -> Option<Self> {
		let kind = match name {
			"bool" => Self::Bool,
			"int8" => Self::Int8,
			"int16" => Self::Int16,
			"int" | "int32" => Self::Int32,
			"int64" => Self::Int64,
			"uint8" => Self::UInt8,
			"uint16" => Self::UInt16,
			"uint" | "uint32" => Self::UInt32,
			"uint64" => Self::UInt64,
			"float" => Self::Float,
			"double" => Self::Double,
			_ => return None,
		};
		Some(kind)
	}

	/// Zero value of this kind.
	pub fn zero(self) -> Scalar {
		match self {
			Self::Bool => Scalar::Bool(false),
			Self::Int8 => Scalar::Int8(0),
			Self::Int16 => Scalar::Int16(0),
			Self::Int32 => Scalar::Int32(0),
			Self::Int64 => Scalar::Int64(0),
			Self::UInt8 => Scalar::UInt8(0),
			Self::UInt16 => Scalar::UInt16(0),
			Self::UInt32 => Scalar::UInt32(0),
			Self::UInt64 => Scalar::UInt64(0),
			Self::Float => Scalar::Float(0.0),
			Self::Double => Scalar::Double(0.0),
		}
	}
}

/// One primitive value copied out of (or into) a slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
	/// `bool`
	Bool(bool),
	/// `int8`
	Int8(i8),
	/// `int16`
	Int16(i16),
	/// `int32`
	Int32(i32),
	/// `int64`
	Int64(i64),
	/// `uint8`
	UInt8(u8),
	/// `uint16`
	UInt16(u16),
	/// `uint32`
	UInt32(u32),
	/// `uint64`
	UInt64(u64),
	/// `float`
	Float(f32),
	/// `double`
	Double(f64),
}

impl Scalar {
	/// Primitive kind tag of this value.
	pub fn kind(&self) -> PrimitiveKind {
		match self {
			Self::Bool(_) => PrimitiveKind::Bool,
			Self::Int8(_) => PrimitiveKind::Int8,
			Self::Int16(_) => PrimitiveKind::Int16,
			Self::Int32(_) => PrimitiveKind::Int32,
			Self::Int64(_) => PrimitiveKind::Int64,
			Self::UInt8(_) => PrimitiveKind::UInt8,
			Self::UInt16(_) => PrimitiveKind::UInt16,
			Self::UInt32(_) => PrimitiveKind::UInt32,
			Self::UInt64(_) => PrimitiveKind::UInt64,
			Self::Float(_) => PrimitiveKind::Float,
			Self::Double(_) => PrimitiveKind::Double,
		}
	}
}

impl fmt::Display for Scalar {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(v) => write!(f, "{v}"),
			Self::Int8(v) => write!(f, "{v}"),
			Self::Int16(v) => write!(f, "{v}"),
			Self::Int32(v) => write!(f, "{v}"),
			Self::Int64(v) => write!(f, "{v}"),
			Self::UInt8(v) => write!(f, "{v}"),
			Self::UInt16(v) => write!(f, "{v}"),
			Self::UInt32(v) => write!(f, "{v}"),
			Self::UInt64(v) => write!(f, "{v}"),
			Self::Float(v) => write!(f, "{v}"),
			Self::Double(v) => write!(f, "{v}"),
		}
	}
}

/// Name and namespace of a script-declared class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectType {
	/// Unqualified class name.
	pub name: String,
	/// Declaring namespace, if any.
	pub namespace: Option<String>,
}

impl ObjectType {
	/// Build a type reference without namespace.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			namespace: None,
		}
	}

	/// Build a type reference inside `namespace`.
	pub fn in_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			namespace: Some(namespace.into()),
		}
	}

	/// `ns::Name` or `Name`.
	pub fn qualified_name(&self) -> String {
		match &self.namespace {
			Some(ns) => format!("{ns}::{}", self.name),
			None => self.name.clone(),
		}
	}
}

/// Declared type of a global, field, or array element, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
	/// Built-in scalar.
	Primitive(PrimitiveKind),
	/// Script enum stored as a raw blob of `size` bytes.
	Enum {
		/// Enum type name.
		name: String,
		/// Storage size in bytes.
		size: usize,
	},
	/// Value type owned by the host application.
	HostValue {
		/// Registered host type name.
		name: String,
	},
	/// Handle into a host-owned object.
	HostHandle {
		/// Registered host type name.
		name: String,
	},
	/// Script class instance stored by value.
	Object(ObjectType),
	/// Handle to a script class instance.
	ObjectHandle(ObjectType),
	/// Dynamically sized ordered sequence.
	Array {
		/// Single declared element type.
		element: Box<TypeDesc>,
	},
	/// Handle to an array.
	ArrayHandle {
		/// Single declared element type.
		element: Box<TypeDesc>,
	},
	/// Associative container.
	Dictionary {
		/// Container type name.
		name: String,
	},
	/// Anything the runtime could not classify.
	Unknown {
		/// Runtime-reported type name.
		name: String,
	},
}

impl TypeDesc {
	/// Script-style declaration text, e.g. `array<Foo@>`.
	pub fn display_name(&self) -> String {
		match self {
			Self::Primitive(kind) => kind.as_str().to_owned(),
			Self::Enum { name, .. } | Self::HostValue { name } | Self::Dictionary { name } | Self::Unknown { name } => name.clone(),
			Self::HostHandle { name } => format!("{name}@"),
			Self::Object(ty) => ty.qualified_name(),
			Self::ObjectHandle(ty) => format!("{}@", ty.qualified_name()),
			Self::Array { element } => format!("array<{}>", element.display_name()),
			Self::ArrayHandle { element } => format!("array<{}>@", element.display_name()),
		}
	}
}

/// One entry of a module's global-variable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVar {
	/// Declared name.
	pub name: String,
	/// Declared type.
	pub ty: TypeDesc,
	/// Compile-time constant; never captured.
	pub is_const: bool,
}

/// One declared field of a script class, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
	/// Declared name.
	pub name: String,
	/// Declared type.
	pub ty: TypeDesc,
}

/// Runtime identity of a script object.
///
/// Only meaningful to the runtime that issued it; the snapshot uses it for
/// deduplication while the source module is still alive and never afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// Runtime identity of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub u64);

/// Address of one storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
	/// Global variable by table index.
	Global(usize),
	/// Field `index` of a script object.
	Field(ObjectId, usize),
	/// Element `index` of an array.
	Element(ArrayId, usize),
}

/// Contents of a slot as seen through the runtime interface.
#[derive(Debug, Clone)]
pub enum SlotValue {
	/// Primitive value.
	Scalar(Scalar),
	/// Raw enum bytes.
	Enum(Vec<u8>),
	/// Host value type.
	Host(HostValue),
	/// Host handle. Reading never changes refcounts.
	HostHandle(HostHandleValue),
	/// Script object stored by value in this slot.
	Object(ObjectId),
	/// Script object handle.
	ObjectHandle(Option<ObjectId>),
	/// Array stored in this slot.
	Array(ArrayId),
	/// Storage the interface cannot look into (dictionaries, array handles).
	Opaque,
}

/// Introspection and mutation of one compiled module and the heap it lives in.
///
/// `write_slot` replaces the slot contents and releases whatever the slot held
/// before; it never acquires a reference for the new value. Callers that store
/// a handle call [`ScriptModule::add_ref`] (or [`crate::reload::HostObject::add_ref`])
/// themselves.
pub trait ScriptModule {
	/// Enumerate the global-variable table in declaration order.
	fn globals(&self) -> Vec<GlobalVar>;

	/// Index of the global named `name`.
	fn global_index(&self, name: &str) -> Option<usize>;

	/// Look up a script class by name in this module.
	fn lookup_type(&self, name: &str, namespace: Option<&str>) -> Option<ObjectType>;

	/// Actual class of a live object.
	fn object_type(&self, object: ObjectId) -> Option<ObjectType>;

	/// Declared fields of a live object's class.
	fn object_fields(&self, object: ObjectId) -> Vec<FieldDecl>;

	/// Allocate an instance without running constructors. The caller owns one reference.
	fn create_uninitialized(&mut self, ty: &ObjectType) -> Option<ObjectId>;

	/// Read the contents of a slot.
	fn read_slot(&self, slot: Slot) -> Option<SlotValue>;

	/// Overwrite the contents of a slot.
	fn write_slot(&mut self, slot: Slot, value: SlotValue) -> Result<()>;

	/// Number of elements in an array.
	fn array_len(&self, array: ArrayId) -> usize;

	/// Resize an array, default-initializing new elements.
	fn resize_array(&mut self, array: ArrayId, len: usize) -> Result<()>;

	/// Increment a script object's refcount.
	fn add_ref(&mut self, object: ObjectId);

	/// Decrement a script object's refcount.
	fn release(&mut self, object: ObjectId);
}

/// Result of one compiler build step.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
	/// Whether the build produced a usable module.
	pub success: bool,
	/// Raw diagnostic stream written during the build.
	pub messages: String,
}

/// Compiler and bytecode serializer of the scripting runtime.
pub trait ScriptEngine {
	/// Module type produced by this engine.
	type Module: ScriptModule;

	/// Create an empty module.
	fn create_module(&mut self, name: &str) -> Self::Module;

	/// Add script text as a named section of `module`.
	fn add_section(&mut self, module: &mut Self::Module, section: &str, text: &str) -> Result<()>;

	/// Compile all sections added to `module`.
	fn build(&mut self, module: &mut Self::Module) -> BuildOutput;

	/// Serialize a built module.
	fn save_bytecode(&self, module: &Self::Module) -> Result<Vec<u8>>;

	/// Populate an empty module from serialized bytes.
	fn load_bytecode(&mut self, module: &mut Self::Module, bytes: &[u8]) -> Result<()>;
}
