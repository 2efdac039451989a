use std::cell::{Ref, RefCell};
use std::rc::Rc;

use scriptreload::reload::{
	ArrayId, BuildOutput, FieldDecl, GlobalVar, HostHandleValue, HostObject, HostTypeRegistry, HostValue, ObjectId, ObjectType, PrimitiveKind, ReloadError, Result, Scalar, ScriptEngine, ScriptModule, Slot, SlotValue,
	TypeDesc,
};

use crate::heap::{ClassInfo, Heap, Layout};
use crate::parse::{ClassDef, EnumDef, Literal, Message, Program, TypeExpr, VarDef, parse_program};

/// Prefix of serialized sandbox modules.
pub const BYTECODE_MAGIC: &str = "SANDBOX-BYTECODE 1\n";

const ENUM_SIZE: usize = 4;

/// Compiler and heap of the sandbox runtime.
#[derive(Debug)]
pub struct SandboxEngine {
	heap: Rc<RefCell<Heap>>,
	registry: HostTypeRegistry,
	opaque_host_types: Vec<String>,
	builds: usize,
	bytecode_loads: usize,
	reject_sections: bool,
}

impl Default for SandboxEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl SandboxEngine {
	/// Engine exposing the default host types plus the unregistered host type `Gadget`.
	pub fn new() -> Self {
		Self {
			heap: Rc::new(RefCell::new(Heap::default())),
			registry: HostTypeRegistry::with_defaults(),
			opaque_host_types: vec!["Gadget".to_owned()],
			builds: 0,
			bytecode_loads: 0,
			reject_sections: false,
		}
	}

	/// Make every `add_section` call fail.
	pub fn reject_sections(mut self, reject: bool) -> Self {
		self.reject_sections = reject;
		self
	}

	/// Number of compiler invocations so far.
	pub fn build_count(&self) -> usize {
		self.builds
	}

	/// Number of modules loaded from bytecode so far.
	pub fn bytecode_loads(&self) -> usize {
		self.bytecode_loads
	}

	/// Script objects alive on the shared heap.
	pub fn live_objects(&self) -> usize {
		self.heap.borrow().objects.len()
	}
}

impl ScriptEngine for SandboxEngine {
	type Module = SandboxModule;

	fn create_module(&mut self, name: &str) -> SandboxModule {
		SandboxModule {
			name: name.to_owned(),
			heap: Rc::clone(&self.heap),
			registry: self.registry.clone(),
			opaque_host_types: self.opaque_host_types.clone(),
			sections: Vec::new(),
			source: None,
			classes: Vec::new(),
			globals: Vec::new(),
			values: Vec::new(),
		}
	}

	fn add_section(&mut self, module: &mut SandboxModule, section: &str, text: &str) -> Result<()> {
		if self.reject_sections {
			return Err(ReloadError::engine("add_section", "section rejected by sandbox"));
		}
		module.sections.push((section.to_owned(), text.to_owned()));
		Ok(())
	}

	fn build(&mut self, module: &mut SandboxModule) -> BuildOutput {
		self.builds += 1;
		let (section, text) = match module.sections.as_slice() {
			[] => ("script".to_owned(), String::new()),
			[(section, _), ..] => (section.clone(), module.sections.iter().map(|(_, text)| text.as_str()).collect::<Vec<_>>().join("\n")),
		};

		let mut messages = Vec::new();
		let success = module.instantiate(&text, &mut messages);
		if success {
			module.source = Some(text);
		}

		let mut out = String::new();
		for message in &messages {
			out.push_str(&message.render(&section));
			out.push('\n');
		}
		BuildOutput { success, messages: out }
	}

	fn save_bytecode(&self, module: &SandboxModule) -> Result<Vec<u8>> {
		let source = module.source.as_deref().ok_or_else(|| ReloadError::engine("save_bytecode", "module was not built"))?;
		Ok(format!("{BYTECODE_MAGIC}{source}").into_bytes())
	}

	fn load_bytecode(&mut self, module: &mut SandboxModule, bytes: &[u8]) -> Result<()> {
		let text = std::str::from_utf8(bytes).map_err(|err| ReloadError::engine("load_bytecode", err.to_string()))?;
		let source = text.strip_prefix(BYTECODE_MAGIC).ok_or_else(|| ReloadError::engine("load_bytecode", "bad bytecode header"))?;

		let mut messages = Vec::new();
		if !module.instantiate(source, &mut messages) {
			let first = messages.first().map(|message| message.render("bytecode")).unwrap_or_default();
			return Err(ReloadError::engine("load_bytecode", first));
		}
		module.source = Some(source.to_owned());
		self.bytecode_loads += 1;
		Ok(())
	}
}

/// One compiled sandbox module and its global storage.
#[derive(Debug)]
pub struct SandboxModule {
	name: String,
	heap: Rc<RefCell<Heap>>,
	registry: HostTypeRegistry,
	opaque_host_types: Vec<String>,
	sections: Vec<(String, String)>,
	source: Option<String>,
	classes: Vec<Rc<ClassInfo>>,
	globals: Vec<GlobalVar>,
	values: Vec<SlotValue>,
}

impl SandboxModule {
	/// Module name given at creation.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Slot of the global named `name`.
	pub fn global_slot(&self, name: &str) -> Option<Slot> {
		self.global_index(name).map(Slot::Global)
	}

	/// Current contents of the global named `name`.
	pub fn global(&self, name: &str) -> Option<SlotValue> {
		self.global_slot(name).and_then(|slot| self.read_slot(slot))
	}

	/// Scalar held by the global named `name`.
	pub fn scalar(&self, name: &str) -> Option<Scalar> {
		match self.global(name)? {
			SlotValue::Scalar(value) => Some(value),
			_ => None,
		}
	}

	/// Object held by value or handle in the global named `name`.
	pub fn object(&self, name: &str) -> Option<ObjectId> {
		match self.global(name)? {
			SlotValue::Object(object) | SlotValue::ObjectHandle(Some(object)) => Some(object),
			_ => None,
		}
	}

	/// Array held by the global named `name`.
	pub fn array(&self, name: &str) -> Option<ArrayId> {
		match self.global(name)? {
			SlotValue::Array(array) => Some(array),
			_ => None,
		}
	}

	/// Slot of field `field` of `object`.
	pub fn field_slot(&self, object: ObjectId, field: &str) -> Option<Slot> {
		let heap = self.heap.borrow();
		let index = heap.objects.get(&object.0)?.class.fields.iter().position(|decl| decl.name == field)?;
		Some(Slot::Field(object, index))
	}

	/// Current contents of field `field` of `object`.
	pub fn field(&self, object: ObjectId, field: &str) -> Option<SlotValue> {
		self.field_slot(object, field).and_then(|slot| self.read_slot(slot))
	}

	/// Allocate an object with no references; the first handle assignment owns it.
	pub fn new_object(&mut self, qualified_name: &str) -> Option<ObjectId> {
		let (namespace, name) = split_qualified(qualified_name);
		let class = self.classes.iter().find(|class| class.ty.name == name && class.ty.namespace.as_deref() == namespace)?.clone();
		let layout = Layout {
			classes: &self.classes,
			registry: &self.registry,
		};
		Some(self.heap.borrow_mut().alloc_object(&layout, &class, 0))
	}

	/// Store a handle and take a reference for the slot, as script assignment does.
	pub fn assign_handle(&mut self, slot: Slot, object: Option<ObjectId>) -> Result<()> {
		if let Some(object) = object {
			self.add_ref(object);
		}
		let written = self.write_slot(slot, SlotValue::ObjectHandle(object));
		if let (Err(_), Some(object)) = (&written, object) {
			self.release(object);
		}
		written
	}

	/// Store a host handle and take a host reference for the slot.
	pub fn assign_host(&mut self, slot: Slot, object: Rc<dyn HostObject>) -> Result<()> {
		self.write_slot(slot, SlotValue::HostHandle(HostHandleValue::Shared(Rc::clone(&object))))?;
		object.add_ref();
		Ok(())
	}

	/// Overwrite a slot with a plain value.
	pub fn set(&mut self, slot: Slot, value: SlotValue) -> Result<()> {
		self.write_slot(slot, value)
	}

	/// Current refcount of `object`, `None` once freed.
	pub fn refcount(&self, object: ObjectId) -> Option<u32> {
		self.heap.borrow().objects.get(&object.0).map(|entry| entry.refcount)
	}

	/// Class name of `object`.
	pub fn class_name(&self, object: ObjectId) -> Option<String> {
		self.object_type(object).map(|ty| ty.qualified_name())
	}

	fn heap(&self) -> Ref<'_, Heap> {
		self.heap.borrow()
	}

	fn instantiate(&mut self, text: &str, messages: &mut Vec<Message>) -> bool {
		let Some(program) = parse_program(text, messages) else {
			return false;
		};
		let Some((classes, globals, inits)) = self.resolve(&program, messages) else {
			return false;
		};
		if messages.iter().any(Message::is_error) {
			return false;
		}

		self.release_globals();
		self.classes = classes;
		self.globals = globals;

		let layout = Layout {
			classes: &self.classes,
			registry: &self.registry,
		};
		let mut heap = self.heap.borrow_mut();
		self.values = self
			.globals
			.iter()
			.zip(inits)
			.map(|(global, init)| match init {
				Some(value) => value,
				None => heap.default_value(&layout, &global.ty),
			})
			.collect();
		true
	}

	fn resolve(&self, program: &Program, messages: &mut Vec<Message>) -> Option<(Vec<Rc<ClassInfo>>, Vec<GlobalVar>, Vec<Option<SlotValue>>)> {
		let resolver = Resolver {
			program,
			registry: &self.registry,
			opaque_host_types: &self.opaque_host_types,
		};

		let mut classes = Vec::new();
		for class in &program.classes {
			classes.push(Rc::new(resolver.class(class, messages)?));
		}

		let mut globals = Vec::new();
		let mut inits = Vec::new();
		for var in &program.globals {
			let (decl, init) = resolver.var(var, None, messages)?;
			if globals.iter().any(|global: &GlobalVar| global.name == decl.name) {
				messages.push(Message::error(var.ty.line, var.ty.col, format!("Name conflict. '{}' is already declared", decl.name)));
				return None;
			}
			globals.push(GlobalVar {
				name: decl.name,
				ty: decl.ty,
				is_const: var.is_const,
			});
			inits.push(init);
		}

		Some((classes, globals, inits))
	}

	fn release_globals(&mut self) {
		let values = std::mem::take(&mut self.values);
		let mut heap = self.heap.borrow_mut();
		for value in values {
			heap.release_value(value);
		}
	}

	fn slot_type(&self, slot: Slot) -> Option<TypeDesc> {
		match slot {
			Slot::Global(index) => self.globals.get(index).map(|global| global.ty.clone()),
			Slot::Field(object, index) => self.heap().objects.get(&object.0)?.class.fields.get(index).map(|field| field.ty.clone()),
			Slot::Element(array, _) => self.heap().arrays.get(&array.0).map(|entry| entry.element.clone()),
		}
	}
}

impl Drop for SandboxModule {
	fn drop(&mut self) {
		self.release_globals();
	}
}

impl ScriptModule for SandboxModule {
	fn globals(&self) -> Vec<GlobalVar> {
		self.globals.clone()
	}

	fn global_index(&self, name: &str) -> Option<usize> {
		self.globals.iter().position(|global| global.name == name)
	}

	fn lookup_type(&self, name: &str, namespace: Option<&str>) -> Option<ObjectType> {
		self.classes.iter().find(|class| class.ty.name == name && class.ty.namespace.as_deref() == namespace).map(|class| class.ty.clone())
	}

	fn object_type(&self, object: ObjectId) -> Option<ObjectType> {
		self.heap().objects.get(&object.0).map(|entry| entry.class.ty.clone())
	}

	fn object_fields(&self, object: ObjectId) -> Vec<FieldDecl> {
		self.heap().objects.get(&object.0).map(|entry| entry.class.fields.clone()).unwrap_or_default()
	}

	fn create_uninitialized(&mut self, ty: &ObjectType) -> Option<ObjectId> {
		let class = self.classes.iter().find(|class| class.ty == *ty)?.clone();
		let layout = Layout {
			classes: &self.classes,
			registry: &self.registry,
		};
		Some(self.heap.borrow_mut().alloc_object(&layout, &class, 1))
	}

	fn read_slot(&self, slot: Slot) -> Option<SlotValue> {
		match slot {
			Slot::Global(index) => self.values.get(index).cloned(),
			Slot::Field(object, index) => self.heap().objects.get(&object.0)?.fields.get(index).cloned(),
			Slot::Element(array, index) => self.heap().arrays.get(&array.0)?.items.get(index).cloned(),
		}
	}

	fn write_slot(&mut self, slot: Slot, value: SlotValue) -> Result<()> {
		let ty = self.slot_type(slot).ok_or_else(|| ReloadError::engine("write_slot", format!("no such slot {slot:?}")))?;
		if !self.heap().fits(&value, &ty) {
			return Err(ReloadError::engine("write_slot", format!("{value:?} does not fit {}", ty.display_name())));
		}

		let old = match slot {
			Slot::Global(index) => self.values.get_mut(index).map(|stored| std::mem::replace(stored, value)),
			Slot::Field(object, index) => {
				let mut heap = self.heap.borrow_mut();
				heap.objects.get_mut(&object.0).and_then(|entry| entry.fields.get_mut(index)).map(|stored| std::mem::replace(stored, value))
			}
			Slot::Element(array, index) => {
				let mut heap = self.heap.borrow_mut();
				heap.arrays.get_mut(&array.0).and_then(|entry| entry.items.get_mut(index)).map(|stored| std::mem::replace(stored, value))
			}
		};

		match old {
			Some(old) => {
				self.heap.borrow_mut().release_value(old);
				Ok(())
			}
			None => Err(ReloadError::engine("write_slot", format!("slot {slot:?} out of range"))),
		}
	}

	fn array_len(&self, array: ArrayId) -> usize {
		self.heap().arrays.get(&array.0).map_or(0, |entry| entry.items.len())
	}

	fn resize_array(&mut self, array: ArrayId, len: usize) -> Result<()> {
		let layout = Layout {
			classes: &self.classes,
			registry: &self.registry,
		};
		let mut heap = self.heap.borrow_mut();
		let (element, current) = match heap.arrays.get(&array.0) {
			Some(entry) => (entry.element.clone(), entry.items.len()),
			None => return Err(ReloadError::engine("resize_array", format!("no such array {}", array.0))),
		};

		if len < current {
			let removed = heap.arrays.get_mut(&array.0).map(|entry| entry.items.split_off(len)).unwrap_or_default();
			for value in removed {
				heap.release_value(value);
			}
			return Ok(());
		}

		let mut added = Vec::with_capacity(len - current);
		for _ in current..len {
			added.push(heap.default_value(&layout, &element));
		}
		if let Some(entry) = heap.arrays.get_mut(&array.0) {
			entry.items.extend(added);
		}
		Ok(())
	}

	fn add_ref(&mut self, object: ObjectId) {
		self.heap.borrow_mut().add_ref(object);
	}

	fn release(&mut self, object: ObjectId) {
		self.heap.borrow_mut().release(object);
	}
}

struct Resolver<'a> {
	program: &'a Program,
	registry: &'a HostTypeRegistry,
	opaque_host_types: &'a [String],
}

impl Resolver<'_> {
	fn class(&self, class: &ClassDef, messages: &mut Vec<Message>) -> Option<ClassInfo> {
		let ty = ObjectType {
			name: class.name.clone(),
			namespace: class.namespace.clone(),
		};
		let mut fields = Vec::new();
		let mut inits = Vec::new();
		for field in &class.fields {
			let (decl, init) = self.var(field, class.namespace.as_deref(), messages)?;
			fields.push(decl);
			inits.push(init);
		}
		Some(ClassInfo { ty, fields, inits })
	}

	fn var(&self, var: &VarDef, namespace: Option<&str>, messages: &mut Vec<Message>) -> Option<(FieldDecl, Option<SlotValue>)> {
		let ty = self.ty(&var.ty, namespace, messages)?;
		let init = match &var.init {
			Some(literal) => Some(self.init(literal, &ty, &var.ty, messages)?),
			None => None,
		};
		Some((FieldDecl { name: var.name.clone(), ty }, init))
	}

	fn ty(&self, expr: &TypeExpr, namespace: Option<&str>, messages: &mut Vec<Message>) -> Option<TypeDesc> {
		if let Some(arg) = &expr.arg {
			if expr.name != "array" {
				messages.push(Message::error(expr.line, expr.col, format!("Template '{}' is not supported", expr.name)));
				return None;
			}
			let element = Box::new(self.ty(arg, namespace, messages)?);
			return Some(if expr.handle { TypeDesc::ArrayHandle { element } } else { TypeDesc::Array { element } });
		}

		if expr.name == "dictionary" {
			return Some(TypeDesc::Dictionary { name: expr.name.clone() });
		}
		if let Some(kind) = PrimitiveKind::from_name(&expr.name) {
			if expr.handle {
				messages.push(Message::error(expr.line, expr.col, format!("Data type can't be '{}@'", expr.name)));
				return None;
			}
			return Some(TypeDesc::Primitive(kind));
		}
		if let Some(ty) = self.find_class(&expr.name, namespace) {
			return Some(if expr.handle { TypeDesc::ObjectHandle(ty) } else { TypeDesc::Object(ty) });
		}
		if let Some(def) = self.find_enum(&expr.name, namespace) {
			return Some(TypeDesc::Enum {
				name: def.name.clone(),
				size: ENUM_SIZE,
			});
		}

		let opaque = self.opaque_host_types.iter().any(|name| *name == expr.name);
		if expr.handle && (opaque || self.registry.handle_entry(&expr.name).is_some()) {
			return Some(TypeDesc::HostHandle { name: expr.name.clone() });
		}
		if !expr.handle && (opaque || self.registry.value_entry(&expr.name).is_some()) {
			return Some(TypeDesc::HostValue { name: expr.name.clone() });
		}

		messages.push(Message::error(expr.line, expr.col, format!("Identifier '{}' is not a data type", expr.name)));
		None
	}

	fn find_class(&self, name: &str, namespace: Option<&str>) -> Option<ObjectType> {
		let (explicit, bare) = split_qualified(name);
		let wanted = explicit.or(namespace);
		let found = self
			.program
			.classes
			.iter()
			.find(|class| class.name == bare && class.namespace.as_deref() == wanted)
			.or_else(|| self.program.classes.iter().find(|class| explicit.is_none() && class.name == bare && class.namespace.is_none()))?;
		Some(ObjectType {
			name: found.name.clone(),
			namespace: found.namespace.clone(),
		})
	}

	fn find_enum(&self, name: &str, namespace: Option<&str>) -> Option<&EnumDef> {
		let (explicit, bare) = split_qualified(name);
		let wanted = explicit.or(namespace);
		self.program
			.enums
			.iter()
			.find(|def| def.name == bare && def.namespace.as_deref() == wanted)
			.or_else(|| self.program.enums.iter().find(|def| explicit.is_none() && def.name == bare && def.namespace.is_none()))
	}

	fn init(&self, literal: &Literal, ty: &TypeDesc, expr: &TypeExpr, messages: &mut Vec<Message>) -> Option<SlotValue> {
		let value = match (ty, literal) {
			(TypeDesc::Primitive(kind), literal) => scalar_from(*kind, literal).map(SlotValue::Scalar),
			(TypeDesc::Enum { name, .. }, Literal::Ident(member)) => self
				.program
				.enums
				.iter()
				.filter(|def| def.name == *name)
				.find_map(|def| def.members.iter().find(|(candidate, _)| candidate == member))
				.map(|(_, value)| SlotValue::Enum((*value as i32).to_le_bytes().to_vec())),
			(TypeDesc::Enum { .. }, Literal::Int(value)) => Some(SlotValue::Enum((*value as i32).to_le_bytes().to_vec())),
			(TypeDesc::HostValue { name }, Literal::Str(text)) if name == "string" => Some(SlotValue::Host(HostValue::String(text.clone()))),
			_ => None,
		};

		if value.is_none() {
			messages.push(Message::error(expr.line, expr.col, format!("Can't implicitly convert {literal:?} to '{}'", ty.display_name())));
		}
		value
	}
}

fn scalar_from(kind: PrimitiveKind, literal: &Literal) -> Option<Scalar> {
	let scalar = match (kind, literal) {
		(PrimitiveKind::Bool, Literal::Bool(value)) => Scalar::Bool(*value),
		(PrimitiveKind::Int8, Literal::Int(value)) => Scalar::Int8(i8::try_from(*value).ok()?),
		(PrimitiveKind::Int16, Literal::Int(value)) => Scalar::Int16(i16::try_from(*value).ok()?),
		(PrimitiveKind::Int32, Literal::Int(value)) => Scalar::Int32(i32::try_from(*value).ok()?),
		(PrimitiveKind::Int64, Literal::Int(value)) => Scalar::Int64(*value),
		(PrimitiveKind::UInt8, Literal::Int(value)) => Scalar::UInt8(u8::try_from(*value).ok()?),
		(PrimitiveKind::UInt16, Literal::Int(value)) => Scalar::UInt16(u16::try_from(*value).ok()?),
		(PrimitiveKind::UInt32, Literal::Int(value)) => Scalar::UInt32(u32::try_from(*value).ok()?),
		(PrimitiveKind::UInt64, Literal::Int(value)) => Scalar::UInt64(u64::try_from(*value).ok()?),
		(PrimitiveKind::Float, Literal::Float(value)) => Scalar::Float(*value as f32),
		(PrimitiveKind::Float, Literal::Int(value)) => Scalar::Float(*value as f32),
		(PrimitiveKind::Double, Literal::Float(value)) => Scalar::Double(*value),
		(PrimitiveKind::Double, Literal::Int(value)) => Scalar::Double(*value as f64),
		_ => return None,
	};
	Some(scalar)
}

fn split_qualified(name: &str) -> (Option<&str>, &str) {
	match name.rsplit_once("::") {
		Some((namespace, bare)) => (Some(namespace), bare),
		None => (None, name),
	}
}
