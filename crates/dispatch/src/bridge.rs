//! Awaitable completion bridge for scheduled operations.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::DispatchError;

/// Terminal outcome of one awaitable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
	/// The callback returned a value.
	Completed(T),
	/// Cancellation was observed before or during execution.
	Cancelled,
	/// A non-cancellation failure escaped the callback.
	Faulted(DispatchError),
}

/// Exactly-once completion slot observed by any number of awaiters.
///
/// Resolution happens on the dispatcher thread, so the slot sits behind a
/// sync lock; awaiters park on a [`Notify`]. Observers registered before or
/// after resolution all see the same terminal outcome.
pub struct TaskBridge<T> {
	slot: Mutex<Option<TaskOutcome<T>>>,
	settled: Notify,
}

impl<T> TaskBridge<T> {
	/// Creates an unresolved bridge.
	pub fn new() -> Self {
		Self {
			slot: Mutex::new(None),
			settled: Notify::new(),
		}
	}

	/// Resolves the bridge exactly once.
	///
	/// A second resolution is a programming error: it panics in debug builds
	/// and is ignored (the first outcome wins) in release builds.
	pub fn resolve(&self, outcome: TaskOutcome<T>) {
		let mut slot = self.slot.lock();
		debug_assert!(slot.is_none(), "task bridge resolved twice");
		if slot.is_none() {
			*slot = Some(outcome);
			drop(slot);
			self.settled.notify_waiters();
		}
	}

	/// Returns true once a terminal outcome is recorded.
	pub fn is_resolved(&self) -> bool {
		self.slot.lock().is_some()
	}
}

impl<T> TaskBridge<T>
where
	T: Clone,
{
	/// Returns the outcome when already resolved, without waiting.
	pub fn peek(&self) -> Option<TaskOutcome<T>> {
		self.slot.lock().clone()
	}

	/// Waits for resolution. Every observer sees the same terminal outcome.
	pub async fn observe(&self) -> TaskOutcome<T> {
		loop {
			// Create Notified before checking the slot to avoid lost-wakeup:
			// the resolver could notify_waiters() between the check and the await.
			let notified = self.settled.notified();
			if let Some(outcome) = self.peek() {
				return outcome;
			}
			notified.await;
		}
	}
}

impl<T> Default for TaskBridge<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> fmt::Debug for TaskBridge<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskBridge").field("resolved", &self.is_resolved()).finish_non_exhaustive()
	}
}

/// Awaitable handle returned by [`crate::Dispatcher::post_async`].
///
/// Cheap to clone; every clone observes the same operation.
#[derive(Debug, Clone)]
pub struct OperationTask<T> {
	bridge: Arc<TaskBridge<T>>,
}

impl<T> OperationTask<T>
where
	T: Clone,
{
	pub(crate) fn new(bridge: Arc<TaskBridge<T>>) -> Self {
		Self { bridge }
	}

	/// Waits for the operation and maps its outcome: cancellation becomes
	/// [`DispatchError::Cancelled`], a fault re-raises the captured error.
	pub async fn join(&self) -> Result<T, DispatchError> {
		match self.bridge.observe().await {
			TaskOutcome::Completed(value) => Ok(value),
			TaskOutcome::Cancelled => Err(DispatchError::Cancelled),
			TaskOutcome::Faulted(err) => Err(err),
		}
	}

	/// Returns the outcome without waiting when the operation already settled.
	pub fn try_outcome(&self) -> Option<TaskOutcome<T>> {
		self.bridge.peek()
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use super::{TaskBridge, TaskOutcome};
	use crate::DispatchError;

	#[tokio::test]
	async fn observers_before_and_after_resolution_see_the_same_outcome() {
		let bridge = Arc::new(TaskBridge::new());

		let early = {
			let bridge = Arc::clone(&bridge);
			tokio::spawn(async move { bridge.observe().await })
		};
		tokio::task::yield_now().await;

		bridge.resolve(TaskOutcome::Completed(7u32));

		assert_eq!(early.await.expect("observer task"), TaskOutcome::Completed(7));
		assert_eq!(bridge.observe().await, TaskOutcome::Completed(7));
		assert_eq!(bridge.peek(), Some(TaskOutcome::Completed(7)));
	}

	#[tokio::test]
	async fn faulted_outcome_is_shared_by_every_clone() {
		let bridge = Arc::new(TaskBridge::<u32>::new());
		let task = super::OperationTask::new(Arc::clone(&bridge));
		let sibling = task.clone();

		bridge.resolve(TaskOutcome::Faulted(DispatchError::Cancelled));

		assert_eq!(task.join().await, Err(DispatchError::Cancelled));
		assert_eq!(sibling.join().await, Err(DispatchError::Cancelled));
	}

	#[tokio::test]
	async fn resolution_wakes_a_parked_observer() {
		let bridge = Arc::new(TaskBridge::new());
		let resolver = {
			let bridge = Arc::clone(&bridge);
			tokio::spawn(async move {
				tokio::time::sleep(Duration::from_millis(20)).await;
				bridge.resolve(TaskOutcome::Completed("done"));
			})
		};

		assert_eq!(bridge.observe().await, TaskOutcome::Completed("done"));
		resolver.await.expect("resolver task");
	}

	#[cfg(debug_assertions)]
	#[test]
	#[should_panic(expected = "resolved twice")]
	fn double_resolution_panics_in_debug_builds() {
		let bridge = TaskBridge::new();
		bridge.resolve(TaskOutcome::Completed(1u8));
		bridge.resolve(TaskOutcome::Completed(2u8));
	}
}
