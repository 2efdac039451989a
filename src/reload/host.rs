use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

/// Closed set of host-owned value types a global can hold by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HostValue {
	/// `vec2`
	Vec2([f32; 2]),
	/// `vec3`
	Vec3([f32; 3]),
	/// `vec4`
	Vec4([f32; 4]),
	/// `ivec2`
	IVec2([i32; 2]),
	/// `ivec3`
	IVec3([i32; 3]),
	/// `ivec4`
	IVec4([i32; 4]),
	/// `quaternion`
	Quaternion([f32; 4]),
	/// `mat4`, column-major.
	Mat4([f32; 16]),
	/// `BoneTransform`: rotation quaternion followed by origin.
	BoneTransform {
		/// Rotation.
		rotation: [f32; 4],
		/// Origin.
		origin: [f32; 3],
	},
	/// `string`
	String(String),
	/// `JSON` document, kept as serialized text.
	Json(String),
	/// `TextureAssetRef`, identified by asset path.
	TextureAssetRef(String),
	/// `ModID`
	ModId(i32),
	/// `FontSetup`
	FontSetup {
		/// Font file name.
		name: String,
		/// Point size.
		size: i32,
		/// Text color.
		color: [f32; 4],
		/// Shadowed rendering.
		shadowed: bool,
	},
	/// `NavPath`: waypoints. Never carried across a reload.
	NavPath(Vec<[f32; 3]>),
	/// `AttackScriptGetter`, identified by the attack asset it loaded.
	AttackScriptGetter(String),
	/// `ModLevel`: one level entry of a mod manifest.
	ModLevel {
		/// Level id.
		id: String,
		/// Display title.
		title: String,
		/// Thumbnail image path.
		thumbnail: String,
		/// Level file path.
		path: String,
		/// Campaign can be completed without this level.
		completion_optional: bool,
		/// Playable online.
		supports_online: bool,
		/// Only playable online.
		requires_online: bool,
	},
	/// `SpawnerItem`: one spawner entry of a mod manifest.
	SpawnerItem {
		/// Display title.
		title: String,
		/// Spawner category.
		category: String,
		/// Object file path.
		path: String,
		/// Thumbnail image path.
		thumbnail: String,
	},
	/// Host value type the registry did not recognize.
	Unknown {
		/// Runtime type name.
		type_name: String,
	},
}

/// Kind tag of a [`HostValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostValueKind {
	/// `vec2`
	Vec2,
	/// `vec3`
	Vec3,
	/// `vec4`
	Vec4,
	/// `ivec2`
	IVec2,
	/// `ivec3`
	IVec3,
	/// `ivec4`
	IVec4,
	/// `quaternion`
	Quaternion,
	/// `mat4`
	Mat4,
	/// `BoneTransform`
	BoneTransform,
	/// `string`
	String,
	/// `JSON`
	Json,
	/// `TextureAssetRef`
	TextureAssetRef,
	/// `ModID`
	ModId,
	/// `FontSetup`
	FontSetup,
	/// `NavPath`
	NavPath,
	/// `AttackScriptGetter`
	AttackScriptGetter,
	/// `ModLevel`
	ModLevel,
	/// `SpawnerItem`
	SpawnerItem,
}

impl HostValueKind {
	/// Value a freshly declared global of this kind holds.
	pub fn default_value(self) -> HostValue {
		match self {
			Self::Vec2 => HostValue::Vec2([0.0; 2]),
			Self::Vec3 => HostValue::Vec3([0.0; 3]),
			Self::Vec4 => HostValue::Vec4([0.0; 4]),
			Self::IVec2 => HostValue::IVec2([0; 2]),
			Self::IVec3 => HostValue::IVec3([0; 3]),
			Self::IVec4 => HostValue::IVec4([0; 4]),
			Self::Quaternion => HostValue::Quaternion([0.0, 0.0, 0.0, 1.0]),
			Self::Mat4 => {
				let mut m = [0.0; 16];
				for i in 0..4 {
					m[i * 5] = 1.0;
				}
				HostValue::Mat4(m)
			}
			Self::BoneTransform => HostValue::BoneTransform {
				rotation: [0.0, 0.0, 0.0, 1.0],
				origin: [0.0; 3],
			},
			Self::String => HostValue::String(String::new()),
			Self::Json => HostValue::Json("null".to_owned()),
			Self::TextureAssetRef => HostValue::TextureAssetRef(String::new()),
			Self::ModId => HostValue::ModId(-1),
			Self::FontSetup => HostValue::FontSetup {
				name: String::new(),
				size: 12,
				color: [1.0; 4],
				shadowed: false,
			},
			Self::NavPath => HostValue::NavPath(Vec::new()),
			Self::AttackScriptGetter => HostValue::AttackScriptGetter(String::new()),
			Self::ModLevel => HostValue::ModLevel {
				id: String::new(),
				title: String::new(),
				thumbnail: String::new(),
				path: String::new(),
				completion_optional: false,
				supports_online: false,
				requires_online: false,
			},
			Self::SpawnerItem => HostValue::SpawnerItem {
				title: String::new(),
				category: String::new(),
				path: String::new(),
				thumbnail: String::new(),
			},
		}
	}
}

impl HostValue {
	/// Kind tag, `None` for [`HostValue::Unknown`].
	pub fn kind(&self) -> Option<HostValueKind> {
		let kind = match self {
			Self::Vec2(_) => HostValueKind::Vec2,
			Self::Vec3(_) => HostValueKind::Vec3,
			Self::Vec4(_) => HostValueKind::Vec4,
			Self::IVec2(_) => HostValueKind::IVec2,
			Self::IVec3(_) => HostValueKind::IVec3,
			Self::IVec4(_) => HostValueKind::IVec4,
			Self::Quaternion(_) => HostValueKind::Quaternion,
			Self::Mat4(_) => HostValueKind::Mat4,
			Self::BoneTransform { .. } => HostValueKind::BoneTransform,
			Self::String(_) => HostValueKind::String,
			Self::Json(_) => HostValueKind::Json,
			Self::TextureAssetRef(_) => HostValueKind::TextureAssetRef,
			Self::ModId(_) => HostValueKind::ModId,
			Self::FontSetup { .. } => HostValueKind::FontSetup,
			Self::NavPath(_) => HostValueKind::NavPath,
			Self::AttackScriptGetter(_) => HostValueKind::AttackScriptGetter,
			Self::ModLevel { .. } => HostValueKind::ModLevel,
			Self::SpawnerItem { .. } => HostValueKind::SpawnerItem,
			Self::Unknown { .. } => return None,
		};
		Some(kind)
	}
}

/// A host-owned, reference-counted object that scripts can hold handles to.
pub trait HostObject: fmt::Debug {
	/// Registered type name, e.g. `IMText`.
	fn type_name(&self) -> &str;
	/// Increment the host refcount.
	fn add_ref(&self);
	/// Decrement the host refcount.
	fn release(&self);
}

/// Identifier of a scene object. Scene objects are owned by the scene and never refcounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SceneObjectId(pub i32);

/// Host handle as stored in a runtime slot. Holding one does not own a reference.
#[derive(Debug, Clone)]
pub enum HostHandleValue {
	/// Null handle.
	Null,
	/// Handle to a refcounted host object.
	Shared(Rc<dyn HostObject>),
	/// Weak reference to a scene object.
	Scene(SceneObjectId),
}

/// One acquired reference to a shared host object, released on drop.
pub struct SharedHostRef {
	object: Rc<dyn HostObject>,
}

impl SharedHostRef {
	/// Take a new reference on `object`.
	pub fn acquire(object: Rc<dyn HostObject>) -> Self {
		object.add_ref();
		Self { object }
	}

	/// Referenced object.
	pub fn object(&self) -> &Rc<dyn HostObject> {
		&self.object
	}
}

impl Clone for SharedHostRef {
	fn clone(&self) -> Self {
		Self::acquire(Rc::clone(&self.object))
	}
}

impl Drop for SharedHostRef {
	fn drop(&mut self) {
		self.object.release();
	}
}

impl fmt::Debug for SharedHostRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SharedHostRef").field(&self.object.type_name()).finish()
	}
}

impl Serialize for SharedHostRef {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.object.type_name())
	}
}

/// Captured host handle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HostHandle {
	/// Null handle.
	Null,
	/// Acquired reference to a shared host object.
	Shared(SharedHostRef),
	/// Scene object id, resolved again on restore.
	Scene(SceneObjectId),
}

/// How a host handle type is owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOwnership {
	/// Refcounted through [`HostObject`].
	Shared,
	/// Owned by the scene, referenced by id.
	Scene,
}

/// Capture and restore routines for one host value type.
#[derive(Debug, Clone, Copy)]
pub struct HostValueVTable {
	/// Expected kind of values stored under this type name.
	pub kind: HostValueKind,
	/// Copy out of the old slot.
	pub capture: fn(&HostValue) -> HostValue,
	/// Produce the value written into the new slot.
	pub restore: fn(&HostValue) -> HostValue,
}

/// Registry entry for one host type name.
#[derive(Debug, Clone, Copy)]
pub enum HostTypeEntry {
	/// Value type that survives reload.
	Value(HostValueVTable),
	/// Value type that can not be stored by value and resets on reload.
	NotRestorable,
	/// Handle type.
	Handle(HandleOwnership),
}

/// Host type name to capture/restore behavior table.
#[derive(Debug, Clone, Default)]
pub struct HostTypeRegistry {
	entries: HashMap<Box<str>, HostTypeEntry>,
}

const COPY_TYPES: &[(&str, HostValueKind)] = &[
	("vec2", HostValueKind::Vec2),
	("vec3", HostValueKind::Vec3),
	("vec4", HostValueKind::Vec4),
	("ivec2", HostValueKind::IVec2),
	("ivec3", HostValueKind::IVec3),
	("ivec4", HostValueKind::IVec4),
	("quaternion", HostValueKind::Quaternion),
	("mat4", HostValueKind::Mat4),
	("BoneTransform", HostValueKind::BoneTransform),
	("string", HostValueKind::String),
	("JSON", HostValueKind::Json),
	("TextureAssetRef", HostValueKind::TextureAssetRef),
	("ModID", HostValueKind::ModId),
	("FontSetup", HostValueKind::FontSetup),
	("AttackScriptGetter", HostValueKind::AttackScriptGetter),
	("ModLevel", HostValueKind::ModLevel),
	("SpawnerItem", HostValueKind::SpawnerItem),
];

/// Widget types scripts hold through refcounted handles.
const WIDGET_HANDLE_TYPES: &[&str] = &[
	"IMContainer",
	"IMDivider",
	"IMImage",
	"IMText",
	"IMTextSelectionList",
	"IMSpacer",
	"IMElement",
	"IMGUI",
	"IMMessage",
	"IMFadeIn",
	"IMMoveIn",
	"IMChangeTextFadeOutIn",
	"IMChangeImageFadeOutIn",
	"IMPulseAlpha",
	"IMPulseBorderAlpha",
	"IMMouseOverMove",
	"IMMouseOverScale",
	"IMMouseOverShowBorder",
	"IMMouseOverPulseColor",
	"IMMouseOverFadeIn",
	"IMMouseOverPulseBorder",
	"IMMouseOverPulseBorderAlpha",
	"IMFixedMessageOnMouseOver",
	"IMFixedMessageOnClick",
];

/// Widget types that reset to their initial values when held by value.
const WIDGET_VALUE_TYPES: &[&str] = &[
	"IMFadeIn",
	"IMMoveIn",
	"IMChangeTextFadeOutIn",
	"IMChangeImageFadeOutIn",
	"IMPulseAlpha",
	"IMPulseBorderAlpha",
	"IMMouseOverScale",
	"IMMouseOverMove",
	"IMMouseOverShowBorder",
	"IMMouseOverPulseColor",
	"IMMouseOverPulseBorder",
	"IMMouseOverPulseBorderAlpha",
	"IMMouseOverFadeIn",
	"IMFixedMessageOnMouseOver",
	"IMFixedMessageOnClick",
	"IMMessage",
	"IMElement",
	"IMContainer",
	"IMDivider",
	"IMImage",
	"IMText",
	"IMSelectionList",
	"IMSpacer",
	"IMUIText",
	"IMUIImage",
];

const SCENE_HANDLE_TYPES: &[&str] = &[
	"Object",
	"AmbientSoundObject",
	"CameraObject",
	"DecalObject",
	"DynamicLightObject",
	"EnvObject",
	"Group",
	"Hotspot",
	"ItemObject",
	"LightProbeObject",
	"LightVolumeObject",
	"MovementObject",
	"NavmeshConnectionObject",
	"NavmeshHintObject",
	"NavmeshRegionObject",
	"PathPointObject",
	"PlaceholderObject",
	"ReflectionCaptureObject",
	"RiggedObject",
	"TerrainObject",
];

impl HostTypeRegistry {
	/// Empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry preloaded with the host types the game exposes to scripts.
	pub fn with_defaults() -> Self {
		let mut registry = Self::new();
		for (name, kind) in COPY_TYPES {
			registry.register_copy(name, *kind);
		}
		registry.register_value(
			"NavPath",
			HostValueVTable {
				kind: HostValueKind::NavPath,
				capture: reset_to_default,
				restore: reset_to_default,
			},
		);
		for name in WIDGET_VALUE_TYPES {
			registry.register_not_restorable(name);
		}
		for name in WIDGET_HANDLE_TYPES {
			registry.register_handle(name, HandleOwnership::Shared);
		}
		for name in SCENE_HANDLE_TYPES {
			registry.register_handle(name, HandleOwnership::Scene);
		}
		registry
	}

	/// Register a value type with custom routines.
	pub fn register_value(&mut self, name: &str, vtable: HostValueVTable) {
		self.entries.insert(value_key(name), HostTypeEntry::Value(vtable));
	}

	/// Register a value type copied as-is in both directions.
	pub fn register_copy(&mut self, name: &str, kind: HostValueKind) {
		self.register_value(
			name,
			HostValueVTable {
				kind,
				capture: HostValue::clone,
				restore: HostValue::clone,
			},
		);
	}

	/// Register a value type that is reset instead of carried over.
	pub fn register_not_restorable(&mut self, name: &str) {
		self.entries.insert(value_key(name), HostTypeEntry::NotRestorable);
	}

	/// Register a handle type.
	pub fn register_handle(&mut self, name: &str, ownership: HandleOwnership) {
		self.entries.insert(handle_key(name), HostTypeEntry::Handle(ownership));
	}

	/// Behavior for a host type stored by value.
	pub fn value_entry(&self, name: &str) -> Option<HostTypeEntry> {
		self.entries.get(name).copied()
	}

	/// Ownership of a host handle type.
	pub fn handle_entry(&self, name: &str) -> Option<HandleOwnership> {
		match self.entries.get(handle_key(name).as_ref()) {
			Some(HostTypeEntry::Handle(ownership)) => Some(*ownership),
			_ => None,
		}
	}

	/// Whether `name` is known either as value or handle type.
	pub fn knows(&self, name: &str) -> bool {
		self.value_entry(name).is_some() || self.handle_entry(name).is_some()
	}
}

fn value_key(name: &str) -> Box<str> {
	name.into()
}

fn handle_key(name: &str) -> Box<str> {
	format!("{name}@").into_boxed_str()
}

fn reset_to_default(value: &HostValue) -> HostValue {
	match value.kind() {
		Some(kind) => kind.default_value(),
		None => value.clone(),
	}
}
