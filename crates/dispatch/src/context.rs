//! Synchronization-context bridge: explicit post/send delegation to a dispatcher.
//!
//! A [`DispatchContext`] is the value-typed bridge handed to asynchronous code
//! that should target a dispatcher without depending on it directly. The only
//! thread-local involvement is the transient override installed while a
//! dispatcher callback executes, so nested continuations started by that
//! callback inherit the same target.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::operation::OperationHandle;
use crate::{DispatchError, Dispatcher, Priority};

thread_local! {
	static ACTIVE: RefCell<Vec<DispatchContext>> = const { RefCell::new(Vec::new()) };
}

/// Immutable `(dispatcher, priority)` pair implementing the ambient post/send
/// abstraction.
///
/// Cloning produces an equivalent bridge with the same settings, suitable for
/// propagation across asynchronous continuations.
#[derive(Clone)]
pub struct DispatchContext {
	dispatcher: Arc<Dispatcher>,
	priority: Priority,
}

impl DispatchContext {
	/// Creates a bridge targeting `dispatcher` at `priority`.
	pub fn new(dispatcher: Arc<Dispatcher>, priority: Priority) -> Self {
		Self { dispatcher, priority }
	}

	/// Returns the bridge installed for the currently executing dispatcher
	/// callback, falling back to the calling thread's dispatcher at
	/// [`Priority::Normal`].
	pub fn current() -> Self {
		ACTIVE
			.with(|stack| stack.borrow().last().cloned())
			.unwrap_or_else(|| Self::new(Dispatcher::current(), Priority::Normal))
	}

	/// Target dispatcher.
	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	/// Configured default priority.
	pub const fn priority(&self) -> Priority {
		self.priority
	}

	/// Derives an equivalent bridge with a different default priority.
	#[must_use]
	pub fn with_priority(&self, priority: Priority) -> Self {
		Self {
			dispatcher: Arc::clone(&self.dispatcher),
			priority,
		}
	}

	/// Fire-and-forget delegation at the configured priority.
	pub fn post<F>(&self, callback: F) -> Result<OperationHandle, DispatchError>
	where
		F: FnOnce() -> Result<(), DispatchError> + Send + 'static,
	{
		self.dispatcher.post(self.priority, callback)
	}

	/// Blocking delegation at the configured priority.
	pub fn send<T, F>(&self, callback: F) -> Result<T, DispatchError>
	where
		T: Send + 'static,
		F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
	{
		self.dispatcher.send(self.priority, callback)
	}
}

impl fmt::Debug for DispatchContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DispatchContext")
			.field("thread", &self.dispatcher.thread())
			.field("priority", &self.priority)
			.finish()
	}
}

/// Scoped installation of the active context around one callback execution.
///
/// Dropping the guard restores the previously installed context, so nested
/// dispatcher callbacks stack correctly.
pub(crate) struct ContextGuard;

impl ContextGuard {
	pub(crate) fn install(context: DispatchContext) -> Self {
		ACTIVE.with(|stack| stack.borrow_mut().push(context));
		Self
	}
}

impl Drop for ContextGuard {
	fn drop(&mut self) {
		ACTIVE.with(|stack| {
			stack.borrow_mut().pop();
		});
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
	use std::sync::Arc;

	use super::{ContextGuard, DispatchContext};
	use crate::{Dispatcher, Priority};

	#[test]
	fn with_priority_keeps_the_dispatcher() {
		let dispatcher = Dispatcher::current();
		let context = DispatchContext::new(Arc::clone(&dispatcher), Priority::Normal);
		let derived = context.with_priority(Priority::Background);

		assert!(Arc::ptr_eq(derived.dispatcher(), &dispatcher));
		assert_eq!(derived.priority(), Priority::Background);
		assert_eq!(context.priority(), Priority::Normal, "original bridge is immutable");
	}

	#[test]
	fn current_falls_back_to_the_thread_dispatcher_at_normal() {
		let context = DispatchContext::current();
		assert!(Arc::ptr_eq(context.dispatcher(), &Dispatcher::current()));
		assert_eq!(context.priority(), Priority::Normal);
	}

	#[test]
	fn installed_override_shadows_and_restores() {
		let dispatcher = Dispatcher::current();
		let guard = ContextGuard::install(DispatchContext::new(Arc::clone(&dispatcher), Priority::Input));
		assert_eq!(DispatchContext::current().priority(), Priority::Input);

		{
			let _nested = ContextGuard::install(DispatchContext::new(Arc::clone(&dispatcher), Priority::Send));
			assert_eq!(DispatchContext::current().priority(), Priority::Send);
		}

		assert_eq!(DispatchContext::current().priority(), Priority::Input);
		drop(guard);
		assert_eq!(DispatchContext::current().priority(), Priority::Normal);
	}
}
