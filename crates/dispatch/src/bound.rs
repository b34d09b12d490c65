//! Creating-thread affinity capability for embedding in owned objects.

use std::sync::Arc;

use crate::{DispatchError, Dispatcher};

/// Permanent affinity of an object to its creating thread's dispatcher.
///
/// Embed one in any type whose state must only be touched on the thread that
/// built it: the capability captures the calling thread's dispatcher at
/// construction and forwards access checks for the object's lifetime.
#[derive(Debug, Clone)]
pub struct DispatcherBound {
	dispatcher: Arc<Dispatcher>,
}

impl DispatcherBound {
	/// Captures the calling thread's dispatcher.
	pub fn new() -> Self {
		Self {
			dispatcher: Dispatcher::current(),
		}
	}

	/// The dispatcher this object is affinitized to.
	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	/// Returns true iff the calling thread is the affinitized thread.
	pub fn check_access(&self) -> bool {
		self.dispatcher.check_access()
	}

	/// Fails with [`DispatchError::WrongThread`] off the affinitized thread.
	pub fn verify_access(&self) -> Result<(), DispatchError> {
		self.dispatcher.verify_access()
	}
}

impl Default for DispatcherBound {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
	use std::sync::Arc;
	use std::thread;

	use super::DispatcherBound;
	use crate::Dispatcher;

	#[test]
	fn affinity_is_captured_at_construction() {
		let bound = DispatcherBound::new();
		assert!(Arc::ptr_eq(bound.dispatcher(), &Dispatcher::current()));
		assert!(bound.check_access());
		assert!(bound.verify_access().is_ok());
	}

	#[test]
	fn affinity_does_not_follow_the_object_across_threads() {
		let bound = DispatcherBound::new();
		let home = bound.dispatcher().thread();

		let moved = thread::spawn(move || {
			assert!(!bound.check_access());
			assert!(bound.verify_access().is_err());
			bound
		})
		.join()
		.expect("moved thread");

		assert_eq!(moved.dispatcher().thread(), home, "affinity is permanent");
	}
}
