use std::cell::Cell;
use std::rc::Rc;

use scriptreload::reload::HostObject;

/// Host object whose refcount tests can read.
#[derive(Debug)]
pub struct CountedHost {
	type_name: String,
	refs: Cell<i32>,
}

impl CountedHost {
	/// New object holding one reference owned by the host.
	pub fn new(type_name: &str) -> Rc<Self> {
		Rc::new(Self {
			type_name: type_name.to_owned(),
			refs: Cell::new(1),
		})
	}

	/// Current refcount.
	pub fn refs(&self) -> i32 {
		self.refs.get()
	}
}

impl HostObject for CountedHost {
	fn type_name(&self) -> &str {
		&self.type_name
	}

	fn add_ref(&self) {
		self.refs.set(self.refs.get() + 1);
	}

	fn release(&self) {
		self.refs.set(self.refs.get() - 1);
	}
}
