use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use scriptreload::reload::{CompileReport, Operator, OperatorChoice};

type ReviewHook = Box<dyn FnMut(&CompileReport)>;

/// Answers reports with queued choices, then [`OperatorChoice::Accept`].
pub struct ScriptedOperator {
	choices: VecDeque<OperatorChoice>,
	reports: Rc<RefCell<Vec<CompileReport>>>,
	hook: Option<ReviewHook>,
}

impl ScriptedOperator {
	/// Operator answering with `choices` in order.
	pub fn new(choices: impl IntoIterator<Item = OperatorChoice>) -> Self {
		Self {
			choices: choices.into_iter().collect(),
			reports: Rc::new(RefCell::new(Vec::new())),
			hook: None,
		}
	}

	/// Run `hook` on every report before answering, e.g. to fix the script on disk.
	pub fn on_review(mut self, hook: impl FnMut(&CompileReport) + 'static) -> Self {
		self.hook = Some(Box::new(hook));
		self
	}

	/// Shared log of every report reviewed so far.
	pub fn reports(&self) -> Rc<RefCell<Vec<CompileReport>>> {
		Rc::clone(&self.reports)
	}
}

impl Operator for ScriptedOperator {
	fn review(&mut self, report: &CompileReport) -> OperatorChoice {
		self.reports.borrow_mut().push(report.clone());
		if let Some(hook) = self.hook.as_mut() {
			hook(report);
		}
		self.choices.pop_front().unwrap_or(OperatorChoice::Accept)
	}
}
